use crate::probe::ProbeReport;
use crossbeam_channel::Sender;
use std::io::{self, Write};
use tracing::{info, warn};

/// Destination for finished probe results. Called once per probe, possibly
/// from several teardown threads at the same time.
pub trait ResultSink: Send + Sync {
    fn report(&self, report: &ProbeReport);
}

/// Prints each result as pretty JSON between rules on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl ResultSink for StdoutSink {
    fn report(&self, report: &ProbeReport) {
        let json = match serde_json::to_string_pretty(report) {
            Ok(json) => json,
            Err(err) => {
                warn!(probe = %report.probe, error = %err, "result not serializable");
                return;
            }
        };
        info!(
            probe = %report.probe,
            rest = %report.rest,
            events = %report.events,
            webhooks = %report.webhooks,
            errors = report.errors.len(),
            "check results"
        );

        let rule = "-".repeat(34);
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "PD check results:\n{rule}\n{json}\n{rule}");
    }
}

/// Forwards results to a channel, for embedding the engine in a larger
/// program.
impl ResultSink for Sender<ProbeReport> {
    fn report(&self, report: &ProbeReport) {
        if self.send(report.clone()).is_err() {
            warn!(probe = %report.probe, "result receiver dropped");
        }
    }
}
