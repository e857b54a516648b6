use anyhow::{bail, Result};
use async_stream::stream;
use clap::Parser;
use common::{
    data::{AudioCodec, FormatKind, Phase, ProgressSnapshot, VideoContainer, VideoMetadata},
    is_supported_url,
    payloads::*,
};
use futures_util::{pin_mut, Stream, StreamExt};
use kdam::{
    term::{self, Colorizer},
    tqdm, BarExt, Column, RichProgress, Spinner,
};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    error::Error,
    fmt,
    io::{self, stderr, IsTerminal},
    time::Duration,
};
use tokio::{io::AsyncBufReadExt, time::sleep};
use tokio_util::io::StreamReader;
use url::Url;

mod sse;

#[derive(Clone, Debug)]
enum ClientError {
    BadStatusCode(u16),
    /// The server understood the request and refused it. Retrying won't help.
    Rejected(ErrorPayload),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadStatusCode(s) => write!(f, "bad status code {s}"),
            Self::Rejected(p) => write!(f, "{} ({})", p.detail, p.kind),
        }
    }
}

impl Error for ClientError {}

/// Runs a function returning Result in a loop with exponentional backoff.
/// Returns a successful response. Rejections are returned immediately.
macro_rules! try_something {
    ($a:expr) => {
        const MAX_TRIES: u8 = 5;
        for i in 0..MAX_TRIES {
            match $a {
                Ok(resp) => return Ok(resp),
                Err(e) if e.downcast_ref::<ClientError>().is_some_and(|c| matches!(c, ClientError::Rejected(_))) => {
                    return Err(e);
                }
                Err(e) => {
                    let to_sleep = 1 << i;
                    eprintln!("try {i} failed, sleeping {to_sleep}s: {e:?}");
                    sleep(Duration::from_secs(to_sleep)).await;
                }
            }
        }
        eprintln!("max tries reached; returning error");
        bail!("max tries reached");
    };
}

struct Api {
    client: Client,
    base: Url,
}

impl Api {
    fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("mediagrab/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .build()?;
        Ok(Self {
            client,
            base: Url::parse(base_url)?,
        })
    }

    /// Processes a response from the server.
    /// This involves checking the status code, decoding the body, etc.
    async fn process_response<Resp: DeserializeOwned>(
        input: reqwest::Result<reqwest::Response>,
        expected_status: u16,
    ) -> Result<Resp> {
        let res = input?;
        let status_code = res.status().as_u16();
        let text = res.text().await?;
        if status_code != expected_status {
            if let Ok(payload) = serde_json::from_str::<ErrorPayload>(&text) {
                bail!(ClientError::Rejected(payload));
            }
            bail!(ClientError::BadStatusCode(status_code));
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(&self, path: &str, payload: &Req) -> Result<Resp> {
        let res = self.client.post(self.base.join(path)?).json(payload).send().await;
        Self::process_response(res, 200).await
    }

    async fn try_post<Req: Serialize, Resp: DeserializeOwned>(&self, path: &str, payload: Req) -> Result<Resp> {
        try_something!(self.post(path, &payload).await);
    }

    async fn validate(&self, url: &str) -> Result<ValidationResponse> {
        self.try_post("api/validate", UrlPayload { url: url.to_string() }).await
    }

    async fn metadata(&self, url: &str) -> Result<VideoMetadata> {
        self.try_post("api/metadata", UrlPayload { url: url.to_string() }).await
    }

    fn download_url(&self, query: &DownloadQuery) -> Result<Url> {
        let mut params = vec![
            ("url", query.url.clone()),
            ("format", query.format.to_string()),
            ("quality", query.quality.clone()),
            ("audio_format", query.audio_format.to_string()),
            ("video_format", query.video_format.to_string()),
        ];
        if let Some(title) = &query.title {
            params.push(("title", title.clone()));
        }
        Ok(Url::parse_with_params(self.base.join("api/download")?.as_str(), &params)?)
    }

    /// Opens the progress stream. Not retried: reconnecting would start a
    /// second job.
    async fn download(&self, query: &DownloadQuery) -> Result<impl Stream<Item = io::Result<ProgressSnapshot>>> {
        let r = self.client.get(self.download_url(query)?).send().await?;
        let status = r.status().as_u16();
        if status != 200 {
            let text = r.text().await.unwrap_or_default();
            if let Ok(payload) = serde_json::from_str::<ErrorPayload>(&text) {
                bail!(ClientError::Rejected(payload));
            }
            bail!(ClientError::BadStatusCode(status));
        }
        let stream = r.bytes_stream().map(|result| result.map_err(io::Error::other));
        let mut reader = StreamReader::new(stream);
        let mut s = String::new();
        Ok(stream! {
            loop {
                s.clear();
                match reader.read_line(&mut s).await {
                    Ok(0) => break, // EOF
                    Ok(_) => match sse::parse_line(&s) {
                        Some(Ok(event)) => yield Ok(event),
                        Some(Err(e)) => yield Err(io::Error::other(e)),
                        None => {}
                    },
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        })
    }
}

fn new_bar(title: &str) -> RichProgress {
    RichProgress::new(
        tqdm!(total = 100),
        vec![
            Column::Spinner(Spinner::new(
                &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"],
                80.0,
                1.0,
            )),
            Column::Text(format!("[bold blue]{title}")),
            Column::Animation,
            Column::Percentage(1),
            Column::Text("•".to_owned()),
            Column::Text(String::new()),
            Column::Text("•".to_owned()),
            Column::Text(String::new()),
        ],
    )
}

/// Follows the stream to its terminal event.
async fn follow(
    events: impl Stream<Item = io::Result<ProgressSnapshot>>,
    title: &str,
    tty: bool,
) -> Result<ProgressSnapshot> {
    pin_mut!(events);
    let mut bar = tty.then(|| new_bar(title));
    let mut last_phase = None;
    let mut last_decile = None;
    while let Some(event) = events.next().await {
        let event = event?;
        if event.is_terminal() {
            if let Some(mut bar) = bar {
                bar.clear()?;
            }
            return Ok(event);
        }
        let phase_changed = last_phase != Some(event.status);
        last_phase = Some(event.status);
        match (&mut bar, event.status) {
            (Some(bar), Phase::Downloading) => {
                bar.columns[5] = Column::Text(event.speed.clone());
                bar.columns[7] = Column::Text(format!("ETA {}", event.eta));
                let _ = bar.update_to(event.percentage as usize);
            }
            (Some(bar), _) if phase_changed => {
                let _ = bar.update_to(100);
                if let Some(message) = &event.message {
                    bar.write(message.as_str().colorize("bold blue"))?;
                }
            }
            (None, Phase::Downloading) => {
                let decile = (event.percentage / 10.0) as u8;
                if last_decile != Some(decile) {
                    eprintln!("{:.1}% at {} (ETA {})", event.percentage, event.speed, event.eta);
                    last_decile = Some(decile);
                }
            }
            (None, _) if phase_changed => {
                eprintln!("{}", event.message.as_deref().unwrap_or("Processing..."));
            }
            _ => {}
        }
    }
    bail!("stream closed before the download finished")
}

fn clock(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

fn lowercase<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_lowercase())).map_err(|e| e.to_string())
}

/// Accepts `720` or `720p`; the server only takes the bare height.
fn height(s: &str) -> Result<String, String> {
    let digits = s.strip_suffix(['p', 'P']).unwrap_or(s);
    if !digits.is_empty() && digits.len() <= 5 && digits.bytes().all(|b| b.is_ascii_digit()) {
        Ok(digits.to_string())
    } else {
        Err(format!("{s:?} is not a video height"))
    }
}

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Downloads a video through a mediagrab server", long_about = None)]
struct Args {
    pub url: String,

    /// audio or video
    #[arg(short, long, value_parser = lowercase::<FormatKind>, default_value = "video")]
    pub format: FormatKind,

    /// Maximum video height
    #[arg(short, long, value_parser = height, default_value = "720")]
    pub quality: String,

    /// mp3 or aac
    #[arg(long, value_parser = lowercase::<AudioCodec>, default_value = "mp3")]
    pub audio_format: AudioCodec,

    /// mp4 or webm
    #[arg(long, value_parser = lowercase::<VideoContainer>, default_value = "mp4")]
    pub video_format: VideoContainer,

    /// Skip the metadata lookup before downloading
    #[arg(long)]
    pub no_metadata: bool,

    #[arg(short, long, env = "MEDIAGRAB_URL", default_value = "http://localhost:8000")]
    pub base_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let is_tty = stderr().is_terminal();
    term::init(is_tty);
    let args = Args::parse();
    if !is_supported_url(&args.url) {
        bail!("{} does not look like a YouTube URL", args.url);
    }

    let api = Api::new(&args.base_url)?;
    let check = api.validate(&args.url).await?;
    if !check.valid {
        bail!("{}", check.message.as_deref().unwrap_or("URL was rejected"));
    }

    let title = if args.no_metadata {
        None
    } else {
        let meta = api.metadata(&args.url).await?;
        eprintln!("{} by {} ({})", meta.title, meta.uploader, clock(meta.duration));
        Some(meta.title)
    };

    let query = DownloadQuery {
        url: args.url.clone(),
        format: args.format,
        quality: args.quality.clone(),
        audio_format: args.audio_format,
        video_format: args.video_format,
        title: title.clone(),
    };
    let events = api.download(&query).await?;
    let end = follow(events, title.as_deref().unwrap_or("download"), is_tty).await?;
    match end.status {
        Phase::Complete => {
            eprintln!("{}", end.message.as_deref().unwrap_or("Download complete!"));
            Ok(())
        }
        _ => bail!("download failed: {}", end.message.as_deref().unwrap_or("unknown error")),
    }
}
