use std::sync::Arc;

use crate::config::PrintingConfig;
use crate::notification::NotificationService;

/// Services shared by every job, query and document of one process.
#[derive(Debug, Clone, Default)]
pub struct PrintEnvironment {
    pub bus: NotificationService,
    pub config: Arc<PrintingConfig>,
}

impl PrintEnvironment {
    pub fn new(config: PrintingConfig) -> Self {
        Self {
            bus: NotificationService::new(),
            config: Arc::new(config),
        }
    }
}
