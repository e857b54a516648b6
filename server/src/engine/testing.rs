use std::{
    fs,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use super::{DownloadSpec, Engine, MediaInfo, RawStatus};
use crate::error::EngineError;

pub enum Step {
    Report(RawStatus),
    Pause(Duration),
}

pub fn downloading(percent: &str) -> Step {
    Step::Report(RawStatus {
        status: "downloading".to_string(),
        percent_str: Some(percent.to_string()),
        speed_str: Some("1.00MiB/s".to_string()),
        eta_str: Some("00:05".to_string()),
    })
}

pub fn finished() -> Step {
    Step::Report(RawStatus {
        status: "finished".to_string(),
        ..Default::default()
    })
}

pub fn pause(ms: u64) -> Step {
    Step::Pause(Duration::from_millis(ms))
}

/// An engine that replays a fixed script and counts how often it is called.
#[derive(Default)]
pub struct ScriptedEngine {
    pub info: Option<MediaInfo>,
    pub extract_error: Option<String>,
    pub steps: Vec<Step>,
    pub download_error: Option<String>,
    /// Writes a file at the output template before running the script.
    pub touch_output: bool,
    pub extract_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl Engine for ScriptedEngine {
    fn extract(&self, _url: &str) -> Result<Option<MediaInfo>, EngineError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        match &self.extract_error {
            Some(text) => Err(EngineError::Failed(text.clone())),
            None => Ok(self.info.clone()),
        }
    }

    fn download(&self, spec: &DownloadSpec, on_status: &dyn Fn(RawStatus)) -> Result<(), EngineError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.touch_output {
            fs::write(&spec.output_template, b"partial")?;
        }
        for step in &self.steps {
            match step {
                Step::Report(status) => on_status(status.clone()),
                Step::Pause(d) => thread::sleep(*d),
            }
        }
        match &self.download_error {
            Some(text) => Err(EngineError::Failed(text.clone())),
            None => Ok(()),
        }
    }
}
