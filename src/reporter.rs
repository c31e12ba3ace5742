use tracing::{error, info};

/// Status and error hooks of the host application.
///
/// Calls are fire-and-forget: implementations must not block or fail.
pub trait StatusReporter: Send + Sync {
    fn status(&self, message: &str);
    fn error(&self, message: &str);
}

/// Reporter that writes provider status to the log.
pub struct TracingReporter {
    provider_id: String,
}

impl TracingReporter {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
        }
    }
}

impl StatusReporter for TracingReporter {
    fn status(&self, message: &str) {
        info!(provider = %self.provider_id, "{}", message);
    }

    fn error(&self, message: &str) {
        error!(provider = %self.provider_id, "{}", message);
    }
}
