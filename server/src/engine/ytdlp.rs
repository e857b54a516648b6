use std::{
    ffi::OsString,
    io::{BufRead, BufReader, ErrorKind, Read},
    path::PathBuf,
    process::{Command, Stdio},
    thread,
};

use common::data::FormatKind;

use super::{DownloadSpec, Engine, MediaInfo, RawStatus};
use crate::error::EngineError;

const PROGRESS_PREFIX: &str = "[progress]";
const PROGRESS_TEMPLATE: &str = "download:[progress]%(progress.status)s\t%(progress._percent_str)s\t%(progress._speed_str)s\t%(progress._eta_str)s";

/// Drives the `yt-dlp` executable.
pub struct YtDlp {
    bin: PathBuf,
}

impl YtDlp {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

/// yt-dlp prints `NA` for fields it does not know yet.
fn field(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty() && *s != "NA")
        .map(str::to_string)
}

/// Parses one stdout line produced by [`PROGRESS_TEMPLATE`].
pub(crate) fn parse_progress_line(line: &str) -> Option<RawStatus> {
    let rest = line.trim_end().strip_prefix(PROGRESS_PREFIX)?;
    let mut parts = rest.split('\t');
    let status = parts.next()?.trim().to_string();
    if status.is_empty() {
        return None;
    }
    Some(RawStatus {
        status,
        percent_str: field(parts.next()),
        speed_str: field(parts.next()),
        eta_str: field(parts.next()),
    })
}

/// The engine prefixes fatal messages with `ERROR:`; prefer the last one.
fn error_text(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .map(|l| l.trim().to_string())
}

pub(crate) fn download_args(spec: &DownloadSpec) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["--newline", "--no-colors", "--no-playlist", "--progress-template", PROGRESS_TEMPLATE]
        .into_iter()
        .map(OsString::from)
        .collect();
    match spec.format {
        FormatKind::Audio => {
            args.extend(["-f", "bestaudio/best", "-x", "--audio-quality", "192K", "--audio-format"].map(OsString::from));
            args.push(spec.audio_codec.to_string().into());
        }
        FormatKind::Video => {
            let q = &spec.quality;
            args.push("-f".into());
            args.push(format!("bestvideo[height<={q}]+bestaudio/best[height<={q}]").into());
            args.push("--merge-output-format".into());
            args.push(spec.video_container.to_string().into());
        }
    }
    args.push("-o".into());
    args.push(spec.output_template.clone().into_os_string());
    args.push("--".into());
    args.push(spec.url.clone().into());
    args
}

impl Engine for YtDlp {
    fn extract(&self, url: &str) -> Result<Option<MediaInfo>, EngineError> {
        let output = Command::new(&self.bin)
            .args(["-J", "--no-warnings", "--no-playlist", "--", url])
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Failed(
                error_text(&stderr).unwrap_or_else(|| format!("engine exited with {}", output.status)),
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() || stdout == "null" {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(stdout)?))
    }

    fn download(&self, spec: &DownloadSpec, on_status: &dyn Fn(RawStatus)) -> Result<(), EngineError> {
        let mut child = Command::new(&self.bin)
            .args(download_args(spec))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // stderr is drained on its own thread so a chatty engine can't fill
        // the pipe while we're blocked on stdout.
        let stderr = child.stderr.take();
        let collector = thread::spawn(move || {
            let mut raw = Vec::new();
            if let Some(mut stderr) = stderr {
                if let Err(e) = stderr.read_to_end(&mut raw) {
                    log::debug!("engine stderr cut short: {e}");
                }
            }
            String::from_utf8_lossy(&raw).into_owned()
        });

        if let Some(stdout) = child.stdout.take() {
            // titles and paths are not always UTF-8; the pipe is read to EOF
            // regardless so the engine never writes into a closed pipe
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        if let Some(status) = parse_progress_line(&String::from_utf8_lossy(&buf)) {
                            on_status(status);
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        log::debug!("stopped reading engine output: {e}");
                        break;
                    }
                }
            }
        }

        let exit = child.wait()?;
        let stderr = collector.join().unwrap_or_default();
        if exit.success() {
            Ok(())
        } else {
            Err(EngineError::Failed(
                error_text(&stderr).unwrap_or_else(|| format!("engine exited with {exit}")),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::data::{AudioCodec, VideoContainer};
    use std::sync::Mutex;

    fn spec(format: FormatKind) -> DownloadSpec {
        DownloadSpec {
            url: "https://youtu.be/abc123".to_string(),
            output_template: PathBuf::from("downloads/x_%(title)s.%(ext)s"),
            format,
            quality: "720".to_string(),
            audio_codec: AudioCodec::Aac,
            video_container: VideoContainer::Webm,
        }
    }

    fn args(format: FormatKind) -> Vec<String> {
        download_args(&spec(format))
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect()
    }

    #[test]
    fn progress_lines() {
        let tests = [
            (
                "[progress]downloading\t 42.5%\t1.20MiB/s\t00:13",
                Some(("downloading", Some(" 42.5%".trim()), Some("1.20MiB/s"), Some("00:13"))),
            ),
            ("[progress]finished\t100.0%\tNA\tNA", Some(("finished", Some("100.0%"), None, None))),
            ("[youtube] abc123: Downloading webpage", None),
            ("[progress]", None),
        ];
        for (line, expected) in tests {
            let got = parse_progress_line(line);
            let expected = expected.map(|(s, p, sp, e)| RawStatus {
                status: s.to_string(),
                percent_str: p.map(str::to_string),
                speed_str: sp.map(str::to_string),
                eta_str: e.map(str::to_string),
            });
            assert_eq!(got, expected, "{line}");
        }
    }

    #[test]
    fn video_args_honor_quality_and_container() {
        let a = args(FormatKind::Video);
        let f = a.iter().position(|x| x == "-f").unwrap();
        assert_eq!(a[f + 1], "bestvideo[height<=720]+bestaudio/best[height<=720]");
        let m = a.iter().position(|x| x == "--merge-output-format").unwrap();
        assert_eq!(a[m + 1], "webm");
        assert_eq!(a.last().unwrap(), "https://youtu.be/abc123");
    }

    #[test]
    fn audio_args_extract_requested_codec() {
        let a = args(FormatKind::Audio);
        assert!(a.contains(&"-x".to_string()));
        let c = a.iter().position(|x| x == "--audio-format").unwrap();
        assert_eq!(a[c + 1], "aac");
        assert!(!a.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn picks_last_error_line() {
        let stderr = "WARNING: something odd\nERROR: first\nERROR: [youtube] abc123: Private video\n";
        assert_eq!(error_text(stderr).as_deref(), Some("ERROR: [youtube] abc123: Private video"));
        assert_eq!(error_text("plain failure\n\n").as_deref(), Some("plain failure"));
        assert_eq!(error_text(""), None);
    }

    /// Installs `body` as an executable stand-in for the engine.
    #[cfg(unix)]
    fn fake_engine(dir: &std::path::Path, body: &str) -> YtDlp {
        use std::os::unix::fs::PermissionsExt;
        let bin = dir.join("fake-yt-dlp");
        std::fs::write(&bin, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        YtDlp::new(bin)
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_output_does_not_break_the_download() {
        let tmp = tempfile::tempdir().unwrap();

        let engine = fake_engine(
            tmp.path(),
            r#"printf '[download] Destination: caf\351.webm\n'
i=0
while [ $i -lt 2000 ]; do
  printf '[progress]downloading\t%s%%\tNA\tNA\n' "$((i / 20))"
  i=$((i + 1))
done
printf '[progress]finished\t100%%\tNA\tNA\n'
exit 0"#,
        );
        let seen = Mutex::new(Vec::new());
        let result = engine.download(&spec(FormatKind::Video), &|s: RawStatus| seen.lock().unwrap().push(s));
        assert!(result.is_ok(), "{result:?}");
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2001);
        assert_eq!(seen.last().unwrap().status, "finished");

        let engine = fake_engine(
            tmp.path(),
            r#"printf 'WARNING: odd byte \377 in title\n' >&2
printf 'ERROR: [youtube] abc123: Private video\n' >&2
exit 1"#,
        );
        match engine.download(&spec(FormatKind::Audio), &|_: RawStatus| {}) {
            Err(EngineError::Failed(text)) => assert_eq!(text, "ERROR: [youtube] abc123: Private video"),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
