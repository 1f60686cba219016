use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use pulse_db::Database;
use pulse_gateway::dispatcher::Dispatcher;
use pulse_gateway::presence::PresenceTracker;
use pulse_types::error::PulseError;

pub type AppState = Arc<AppStateInner>;

/// Tunables for the services behind the HTTP surface.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub jwt_secret: String,
    /// Upper bound on any single store call before it fails as retryable.
    pub store_timeout: Duration,
    /// Rows per insert batch on the broadcast path.
    pub broadcast_batch_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-change-me".into(),
            store_timeout: Duration::from_secs(10),
            broadcast_batch_size: 100,
        }
    }
}

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub presence: PresenceTracker,
    pub config: ServiceConfig,
}

impl AppStateInner {
    pub fn new(db: Database, dispatcher: Dispatcher, presence: PresenceTracker, config: ServiceConfig) -> AppState {
        Arc::new(Self {
            db: Arc::new(db),
            dispatcher,
            presence,
            config,
        })
    }

    /// Run a blocking store call off the async runtime, bounded by the
    /// configured timeout. Timeouts and SQLite busy/locked errors come back
    /// as retryable [`PulseError::TransientDelivery`].
    pub async fn store<F, T>(&self, f: F) -> Result<T, PulseError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || f(&db));

        match tokio::time::timeout(self.config.store_timeout, task).await {
            Err(_) => Err(PulseError::TransientDelivery(format!(
                "store call exceeded {:?}",
                self.config.store_timeout
            ))),
            Ok(Err(e)) => {
                error!("spawn_blocking join error: {}", e);
                Err(PulseError::Internal("store task failed".into()))
            }
            Ok(Ok(result)) => result.map_err(classify_store_error),
        }
    }
}

fn classify_store_error(e: anyhow::Error) -> PulseError {
    if let Some(rusqlite::Error::SqliteFailure(failure, _)) = e.downcast_ref::<rusqlite::Error>() {
        if matches!(
            failure.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ) {
            return PulseError::TransientDelivery(e.to_string());
        }
    }
    error!("Store error: {:#}", e);
    PulseError::Internal("store failure".into())
}
