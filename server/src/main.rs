use std::{io, sync::Arc, time::Duration};

use actix_cors::Cors;
use actix_web::{get, http::header, middleware::Logger, post, web, App, HttpResponse, HttpServer, Responder};
use clap::Parser;
use common::{
    data::VideoMetadata,
    is_supported_url,
    payloads::{DownloadQuery, HealthResponse, UrlPayload, ValidationResponse},
};
use tokio_util::sync::CancellationToken;

mod bridge;
mod config;
mod engine;
mod error;
mod events;
mod files;
mod job;
mod runner;
mod sweeper;

use bridge::ProgressBridge;
use config::Config;
use engine::{Engine, YtDlp};
use error::{ApiError, EngineError, ExtractionKind};
use files::OutputAllocator;
use job::Job;
use runner::JobRunner;
use sweeper::Sweeper;

#[get("/")]
async fn slash() -> impl Responder {
    HttpResponse::Ok().body("mediagrab is running")
}

#[get("/health")]
async fn health() -> impl Responder {
    web::Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

#[post("/api/validate")]
async fn validate(ctx: web::Data<SharedCtx>, body: web::Json<UrlPayload>) -> impl Responder {
    let url = body.into_inner().url;
    if !is_supported_url(&url) {
        return web::Json(ValidationResponse::invalid("Invalid YouTube URL format"));
    }
    let resp = match ctx.runner.run_blocking(move |engine| engine.extract(&url)).await {
        Ok(Ok(Some(_))) => ValidationResponse::valid(),
        Ok(Ok(None)) => ValidationResponse::invalid("Could not fetch video information"),
        Ok(Err(EngineError::Failed(text))) => {
            log::debug!("validation refused by engine: {text}");
            ValidationResponse::invalid(ExtractionKind::classify(&text).message())
        }
        Ok(Err(e)) => ValidationResponse::invalid(format!("Validation error: {e}")),
        Err(e) => ValidationResponse::invalid(format!("Validation error: {e}")),
    };
    web::Json(resp)
}

#[post("/api/metadata")]
async fn metadata(
    ctx: web::Data<SharedCtx>,
    body: web::Json<UrlPayload>,
) -> Result<web::Json<VideoMetadata>, ApiError> {
    let url = body.into_inner().url;
    if !is_supported_url(&url) {
        return Err(ApiError::MalformedInput);
    }
    let info = ctx
        .runner
        .run_blocking(move |engine| engine.extract(&url))
        .await?
        .map_err(ApiError::from_extraction)?
        .ok_or(ApiError::NotFound)?;
    Ok(web::Json(info.into_metadata()))
}

#[get("/api/download")]
async fn download(
    ctx: web::Data<SharedCtx>,
    query: web::Query<DownloadQuery>,
) -> Result<HttpResponse, ApiError> {
    let job = Job::accept(query.into_inner(), &ctx.allocator)?;
    log::info!(
        "job {} accepted: {} as {} -> {}",
        job.id,
        job.target_url,
        job.format_kind,
        job.output_path.display()
    );
    let bridge = ProgressBridge::new(job.format_kind);
    let handle = ctx.runner.start(job, bridge.clone());
    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(events::progress_events(bridge, handle, ctx.poll_interval)))
}

struct SharedCtx {
    runner: JobRunner,
    allocator: OutputAllocator,
    poll_interval: Duration,
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(slash)
        .service(health)
        .service(validate)
        .service(metadata)
        .service(download);
}

fn cors(origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allow_any_method()
        .allow_any_header();
    if origins.is_empty() {
        return cors.allow_any_origin();
    }
    origins.iter().fold(cors, |cors, o| cors.allowed_origin(o))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = Config::parse();
    config.check().map_err(io::Error::other)?;
    files::ensure_dir(&config.download_dir)?;
    log::info!("writing downloads to {}", config.download_dir.display());

    let engine: Arc<dyn Engine> = Arc::new(YtDlp::new(config.ytdlp_bin.clone()));
    let ctx = web::Data::new(SharedCtx {
        runner: JobRunner::new(engine, config.engine_lanes),
        allocator: OutputAllocator::new(config.download_dir.clone()),
        poll_interval: config.poll_interval(),
    });

    let shutdown = CancellationToken::new();
    let sweeper = Sweeper {
        dir: config.download_dir.clone(),
        retention: config.retention(),
        every: config.sweep_interval(),
        skip_partial: config.skip_partial,
    }
    .spawn(shutdown.clone());

    let origins = config.cors_origins.clone();
    let served = HttpServer::new(move || {
        App::new()
            .wrap(cors(&origins))
            .wrap(Logger::default())
            .app_data(ctx.clone())
            .configure(routes)
    })
    .bind((config.bind.as_str(), config.port))?
    .run()
    .await;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        log::error!("sweeper task ended abnormally: {e}");
    }
    served
}
