use std::sync::Arc;

use crate::config::Config;
use crate::events::EventHub;
use crate::queue::JobQueue;
use crate::store::JobStore;

/// The collaborators shared by the API, the dispatcher, and every worker.
/// Passed explicitly instead of living in globals.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: JobStore,
    pub queue: Arc<JobQueue>,
    pub hub: Arc<EventHub>,
}
