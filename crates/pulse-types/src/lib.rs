pub mod api;
pub mod error;
pub mod events;
pub mod grouping;
pub mod message;
pub mod notification;
pub mod topic;
