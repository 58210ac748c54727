use crate::SegflowServerConfig;
use crate::dispatcher::JobDispatcher;
use crate::registry::JobRegistry;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub dispatcher: JobDispatcher,
    pub config: Arc<SegflowServerConfig>,
}

impl AppState {
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &SegflowServerConfig {
        &self.config
    }

    /// Stops accepting work: running tools are terminated, queued jobs fail.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}
