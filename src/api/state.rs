use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::callback::CallbackHandler;
use crate::objstore::ObjectStore;
use crate::scheduler::ContainerScheduler;
use crate::session_service::SessionService;

/// Everything an HTTP handler needs, constructed once at process startup
/// and shared behind an `Arc` the way the teacher's `AppState` is.
pub struct AppState {
    pub sessions: Arc<SessionService>,
    pub callbacks: Arc<CallbackHandler>,
    pub scheduler: Arc<dyn ContainerScheduler>,
    pub objstore: Arc<dyn ObjectStore>,
    pub pool: sqlx::MySqlPool,
    pub objstore_bucket: String,
    pub callback_shared_token: String,
    pub started_at: DateTime<Utc>,
    pub version: &'static str,
}
