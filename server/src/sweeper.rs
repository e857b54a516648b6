use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tokio::{
    fs::{read_dir, remove_file},
    select,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Suffixes the engine gives files it is still writing.
const PARTIAL_SUFFIXES: [&str; 2] = [".part", ".ytdl"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub retained: usize,
    pub failed: usize,
}

/// Deletes output files older than the retention threshold, once per
/// interval, until cancelled.
///
/// A file that a job is still writing can be deleted too if the job has
/// been running longer than the threshold. The config check in `main`
/// refuses thresholds below the maximum job duration; `skip_partial` is an
/// additional opt-in guard.
pub struct Sweeper {
    pub dir: PathBuf,
    pub retention: Duration,
    pub every: Duration,
    pub skip_partial: bool,
}

/// Strictly older than the threshold. Timestamps in the future never expire.
pub fn is_expired(modified: SystemTime, now: SystemTime, retention: Duration) -> bool {
    now.duration_since(modified)
        .map(|age| age > retention)
        .unwrap_or(false)
}

fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| PARTIAL_SUFFIXES.iter().any(|s| n.ends_with(s)))
}

impl Sweeper {
    /// Starts the loop. The first sweep runs immediately.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(self, shutdown: CancellationToken) {
        log::info!(
            "sweeping {} every {}s, retention {}s",
            self.dir.display(),
            self.every.as_secs(),
            self.retention.as_secs()
        );
        let mut timer = interval(self.every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            select! {
                _ = timer.tick() => {
                    let report = self.sweep_once(SystemTime::now()).await;
                    log::debug!("sweep done: {report:?}");
                }
                _ = shutdown.cancelled() => {
                    log::info!("sweeper stopped");
                    return;
                }
            }
        }
    }

    /// One pass over the directory as seen at `now`. Per-file failures are
    /// logged and counted; they never end the pass.
    pub async fn sweep_once(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();
        let mut entries = match read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("cannot list {}: {e}", self.dir.display());
                report.failed += 1;
                return report;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("listing {} stopped early: {e}", self.dir.display());
                    report.failed += 1;
                    break;
                }
            };
            let path = entry.path();
            let modified = match entry.metadata().await {
                Ok(meta) if !meta.is_file() => continue,
                Ok(meta) => meta.modified(),
                Err(e) => Err(e),
            };
            let modified = match modified {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("cannot stat {}: {e}", path.display());
                    report.failed += 1;
                    continue;
                }
            };
            if !is_expired(modified, now, self.retention) || (self.skip_partial && is_partial(&path)) {
                report.retained += 1;
                continue;
            }
            match remove_file(&path).await {
                Ok(()) => {
                    log::info!("cleaned up {}", path.display());
                    report.deleted += 1;
                }
                Err(e) => {
                    log::warn!("could not delete {}: {e}", path.display());
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const HOUR: Duration = Duration::from_secs(3600);

    fn sweeper(dir: &Path, skip_partial: bool) -> Sweeper {
        Sweeper {
            dir: dir.to_path_buf(),
            retention: HOUR,
            every: Duration::from_millis(20),
            skip_partial,
        }
    }

    fn file_aged(dir: &Path, name: &str, now: SystemTime, age: Duration) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"media").unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(now - age)
            .unwrap();
        path
    }

    #[test]
    fn expiry_is_strict() {
        let now = SystemTime::now();
        assert!(is_expired(now - Duration::from_secs(3601), now, HOUR));
        assert!(!is_expired(now - HOUR, now, HOUR));
        assert!(!is_expired(now - Duration::from_secs(3599), now, HOUR));
        assert!(!is_expired(now + Duration::from_secs(10), now, HOUR));
    }

    #[tokio::test]
    async fn deletes_only_files_past_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let old = file_aged(tmp.path(), "old.mp4", now, Duration::from_secs(3601));
        let young = file_aged(tmp.path(), "young.mp4", now, Duration::from_secs(3599));
        fs::create_dir(tmp.path().join("subdir")).unwrap();

        let report = sweeper(tmp.path(), false).sweep_once(now).await;
        assert_eq!(report, SweepReport { deleted: 1, retained: 1, failed: 0 });
        assert!(!old.exists());
        assert!(young.exists());
        assert!(tmp.path().join("subdir").is_dir());
    }

    #[tokio::test]
    async fn partial_files_survive_only_when_asked() {
        let tmp = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let part = file_aged(tmp.path(), "a.mp4.part", now, Duration::from_secs(7200));
        let report = sweeper(tmp.path(), true).sweep_once(now).await;
        assert_eq!(report.retained, 1);
        assert!(part.exists());

        let report = sweeper(tmp.path(), false).sweep_once(now).await;
        assert_eq!(report.deleted, 1);
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn missing_directory_is_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let report = sweeper(&tmp.path().join("gone"), false)
            .sweep_once(SystemTime::now())
            .await;
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn loop_keeps_running_and_stops_on_cancel() {
        let tmp = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let handle = sweeper(tmp.path(), false).spawn(token.clone());

        // the loop survives a cycle where the directory briefly disappears
        let dir = tmp.path().to_path_buf();
        fs::remove_dir(&dir).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        fs::create_dir(&dir).unwrap();
        let stale = file_aged(&dir, "stale.mp3", SystemTime::now(), Duration::from_secs(4000));

        for _ in 0..100 {
            if !stale.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!stale.exists());
        assert!(!handle.is_finished());

        token.cancel();
        handle.await.unwrap();
    }
}
