//! Server-sent progress events for a single job.

use std::time::Duration;

use actix_web::web::Bytes;
use async_stream::try_stream;
use common::data::ProgressSnapshot;
use futures::Stream;
use tokio::{select, time::sleep};

use crate::{bridge::ProgressBridge, runner::JobHandle};

/// Frames one snapshot as a `data:` event.
pub fn encode_event(snapshot: &ProgressSnapshot) -> serde_json::Result<Bytes> {
    let mut frame = b"data: ".to_vec();
    serde_json::to_writer(&mut frame, snapshot)?;
    frame.extend_from_slice(b"\n\n");
    Ok(Bytes::from(frame))
}

/// Logs when the consumer goes away before the terminal event.
struct Observer {
    job_id: String,
    done: bool,
}

impl Drop for Observer {
    fn drop(&mut self) {
        if !self.done {
            log::info!("client stopped observing job {}; the download continues", self.job_id);
        }
    }
}

/// Polls `bridge` every `interval` until `job` resolves, then emits exactly
/// one terminal event built from the job's outcome and ends.
///
/// Dropping the stream stops the polling. The job itself is left running.
pub fn progress_events(
    bridge: ProgressBridge,
    mut job: JobHandle,
    interval: Duration,
) -> impl Stream<Item = serde_json::Result<Bytes>> {
    try_stream! {
        let mut observer = Observer { job_id: job.id.clone(), done: false };
        let outcome = loop {
            let snapshot = bridge.read();
            // the job's outcome decides how the stream ends, not the bridge
            if !snapshot.is_terminal() {
                yield encode_event(&snapshot)?;
            }
            select! {
                outcome = &mut job => break outcome,
                _ = sleep(interval) => {}
            }
        };
        let terminal = match outcome {
            Ok(()) => ProgressSnapshot::complete(),
            Err(e) => ProgressSnapshot::error(e.stream_message()),
        };
        observer.done = true;
        yield encode_event(&terminal)?;
    }
}
