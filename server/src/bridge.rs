//! Single-slot, last-value-wins progress cell between the engine's callback
//! and the stream poller.

use std::sync::Arc;

use common::data::{FormatKind, Phase, ProgressSnapshot};
use tokio::sync::watch;

use crate::engine::RawStatus;

const UNKNOWN: &str = "N/A";

#[derive(Clone)]
pub struct ProgressBridge {
    cell: Arc<watch::Sender<ProgressSnapshot>>,
    processing_message: &'static str,
}

fn parse_percent(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().trim_end_matches('%').trim().parse().ok()?;
    value.is_finite().then(|| value.clamp(0.0, 100.0))
}

fn display(raw: &Option<String>) -> String {
    raw.clone().unwrap_or_else(|| UNKNOWN.to_string())
}

impl ProgressBridge {
    pub fn new(kind: FormatKind) -> Self {
        let (cell, _) = watch::channel(ProgressSnapshot::starting());
        Self {
            cell: Arc::new(cell),
            processing_message: match kind {
                FormatKind::Audio => "Processing audio...",
                FormatKind::Video => "Processing video...",
            },
        }
    }

    /// Current snapshot. Never blocks for longer than a concurrent write.
    pub fn read(&self) -> ProgressSnapshot {
        self.cell.borrow().clone()
    }

    /// Applies one engine report. Reports that don't fit the state machine,
    /// or whose percentage can't be read, leave the snapshot as it was.
    pub fn on_event(&self, raw: &RawStatus) {
        self.cell.send_if_modified(|current| match self.advance(current, raw) {
            Some(next) => {
                *current = next;
                true
            }
            None => false,
        });
    }

    fn advance(&self, current: &ProgressSnapshot, raw: &RawStatus) -> Option<ProgressSnapshot> {
        if current.is_terminal() {
            return None;
        }
        match raw.status.as_str() {
            "downloading" if current.status == Phase::Downloading => {
                let percentage = parse_percent(raw.percent_str.as_deref()?)?;
                Some(ProgressSnapshot {
                    percentage: percentage.max(current.percentage),
                    speed: display(&raw.speed_str),
                    eta: display(&raw.eta_str),
                    status: Phase::Downloading,
                    message: None,
                })
            }
            "finished" => Some(ProgressSnapshot::processing(self.processing_message)),
            "error" => Some(ProgressSnapshot::error("Download failed")),
            _ => None,
        }
    }

    pub fn complete(&self) {
        self.settle(ProgressSnapshot::complete());
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.settle(ProgressSnapshot::error(message));
    }

    fn settle(&self, terminal: ProgressSnapshot) {
        self.cell.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = terminal;
            true
        });
    }
}
