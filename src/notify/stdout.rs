//! The default notifier: writes each log line as structured JSON to
//! stdout through `tracing`, so a deployment with no notifier configured
//! still gets an auditable record in its log stream.

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::StageError;
use crate::logline::{LogLine, Status};
use crate::registry::Notifier;

pub struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn notify(&self, line: &LogLine) -> Result<(), StageError> {
        match line.status {
            Some(Status::Failure) => error!(
                trace_id = %line.trace_id,
                rule = line.rule.as_deref().unwrap_or(""),
                action = line.action.as_deref().unwrap_or(""),
                error = line.error.as_deref().unwrap_or(""),
                "action failed",
            ),
            _ => info!(
                trace_id = %line.trace_id,
                rule = line.rule.as_deref().unwrap_or(""),
                action = line.action.as_deref().unwrap_or(""),
                output = line.output.as_deref().unwrap_or(""),
                "action completed",
            ),
        }
        Ok(())
    }
}
