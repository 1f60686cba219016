//! Client-side state that sits between the realtime stream and the UI:
//! subscription ownership, the notification feed, conversation views with
//! optimistic sends, and retry policy for transient failures.

pub mod conversation;
pub mod feed;
pub mod retry;
pub mod subscriptions;
