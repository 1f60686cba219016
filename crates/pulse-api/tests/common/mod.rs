#![allow(dead_code)]

use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use pulse_api::middleware::Claims;
use pulse_api::state::{AppState, AppStateInner, ServiceConfig};
use pulse_db::Database;
use pulse_gateway::dispatcher::Dispatcher;
use pulse_gateway::presence::{DEFAULT_SESSION_TTL, PresenceTracker};

pub const SECRET: &str = "integration-test-secret";

pub fn state() -> AppState {
    state_with(ServiceConfig {
        jwt_secret: SECRET.into(),
        ..ServiceConfig::default()
    })
}

pub fn state_with(config: ServiceConfig) -> AppState {
    let dispatcher = Dispatcher::new();
    let presence = PresenceTracker::new(dispatcher.clone(), DEFAULT_SESSION_TTL);
    AppStateInner::new(Database::open_in_memory().unwrap(), dispatcher, presence, config)
}

pub fn claims(username: &str, admin: bool) -> Claims {
    Claims {
        sub: Uuid::new_v4(),
        username: username.into(),
        avatar_url: None,
        admin,
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    }
}

pub fn token(claims: &Claims) -> String {
    encode(&Header::default(), claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}
