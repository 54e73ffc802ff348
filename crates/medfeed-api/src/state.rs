use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use medfeed_db::Database;

use crate::classifier::Classifier;
use crate::error::FeedError;
use crate::media::MediaStore;

pub type AppState = Arc<AppContext>;

/// Everything a request handler needs, built once at startup.
pub struct AppContext {
    pub db: Database,
    pub media: MediaStore,
    pub classifier: Arc<dyn Classifier>,
    pub sessions: SessionSettings,
    pub classifier_timeout: Duration,
    pub max_upload_bytes: usize,
}

pub struct SessionSettings {
    pub jwt_secret: String,
    /// Lifetime of an ordinary login.
    pub ttl: chrono::Duration,
    /// Lifetime when the caller asked to be remembered.
    pub remember_ttl: chrono::Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            ttl: chrono::Duration::hours(24),
            remember_ttl: chrono::Duration::days(30),
        }
    }
}

impl AppContext {
    pub fn new(
        db: Database,
        media: MediaStore,
        classifier: Arc<dyn Classifier>,
        sessions: SessionSettings,
    ) -> Self {
        Self {
            db,
            media,
            classifier,
            sessions,
            classifier_timeout: Duration::from_secs(30),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }

    pub fn with_classifier_timeout(mut self, timeout: Duration) -> Self {
        self.classifier_timeout = timeout;
        self
    }

    pub fn with_max_upload_bytes(mut self, limit: usize) -> Self {
        self.max_upload_bytes = limit;
        self
    }
}

/// Run store or image work off the async runtime.
pub async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, FeedError>
where
    F: FnOnce(&AppContext) -> Result<T, FeedError> + Send + 'static,
    T: Send + 'static,
{
    let ctx = state.clone();
    tokio::task::spawn_blocking(move || f(&ctx))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            FeedError::Internal(anyhow::anyhow!("worker task failed: {}", e))
        })?
}
