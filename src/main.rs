use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratewatch::aggregate::hour_floor;
use ratewatch::client::{RateLimitClient, StaticToken};
use ratewatch::dashboard::{render, Dashboard, Phase, TimeRange, ToastLog};
use ratewatch::filters::FilterCriteria;
use ratewatch::store::memory::{MemoryStore, SeedData};
use ratewatch::store::postgres::PgStore;
use ratewatch::store::MetricsStore;
use ratewatch::{api, auth, cli, config, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let json_logs = std::env::var("RATEWATCH_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let (json_layer, text_layer) = if json_logs {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "ratewatch=debug,tower_http=debug".into()),
        ))
        .with(json_layer)
        .with(text_layer)
        .init();

    let args = cli::Cli::parse();
    let cfg = config::load()?;

    let result = match args.command {
        Some(cli::Commands::Serve {
            port,
            in_memory,
            seed,
        }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port, in_memory, seed).await
        }
        Some(cli::Commands::Dashboard {
            range,
            base_url,
            token,
            feature,
            search,
        }) => run_dashboard(cfg, range, base_url, token, feature, search).await,
        Some(cli::Commands::Rollup { hour }) => run_rollup(&cfg, hour.as_deref()).await,
        Some(cli::Commands::Purge { days }) => {
            let store = PgStore::connect(&cfg.database_url).await?;
            let days = days.unwrap_or(cfg.retention_days);
            let removed = jobs::cleanup::purge_expired(&store, days, Utc::now()).await?;
            println!("Purged {} rows older than {} days.", removed, days);
            Ok(())
        }
        Some(cli::Commands::Token {
            sub,
            role,
            ttl_hours,
        }) => {
            let token = auth::issue_token(
                &sub,
                Some(role.as_str()),
                chrono::Duration::hours(ttl_hours),
                &cfg.jwt_secret,
            )?;
            println!("{}", token);
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port, false, None).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(
    cfg: config::Config,
    port: u16,
    in_memory: bool,
    seed: Option<PathBuf>,
) -> anyhow::Result<()> {
    let store: Arc<dyn MetricsStore> = if in_memory {
        tracing::warn!("Using in-memory store, data is lost on exit");
        let memory = MemoryStore::new();
        if let Some(path) = seed {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read seed file {}", path.display()))?;
            let data: SeedData = serde_json::from_str(&raw)
                .with_context(|| format!("invalid seed file {}", path.display()))?;
            let buckets = memory.load_seed(data).await?;
            tracing::info!(path = %path.display(), buckets, "Seed data loaded");
        }
        Arc::new(memory)
    } else {
        tracing::info!("Connecting to database...");
        let db = PgStore::connect(&cfg.database_url)
            .await
            .context("failed to connect to DATABASE_URL")?;

        tracing::info!("Running migrations...");
        db.migrate().await?;
        Arc::new(db)
    };

    let rollup_interval = cfg.rollup_interval_secs;
    let retention_days = cfg.retention_days;
    let state = Arc::new(AppState::new(store.clone(), cfg)?);

    let app = api::app(state)
        .layer({
            use axum::http::{header, Method};
            use tower_http::cors::AllowOrigin;
            let dashboard_origin = std::env::var("DASHBOARD_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string());
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        })
        .layer(axum::middleware::from_fn(request_id_middleware));

    jobs::rollup::spawn(store.clone(), rollup_interval);
    tracing::info!(interval_secs = rollup_interval, "Background rollup job started");
    jobs::cleanup::spawn(store, retention_days);
    tracing::info!(retention_days, "Background cleanup job started (every 1h)");

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("ratewatch listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}

async fn run_dashboard(
    cfg: config::Config,
    range: TimeRange,
    base_url: Option<String>,
    token: Option<String>,
    features: Vec<String>,
    search: Option<String>,
) -> anyhow::Result<()> {
    let base_url = base_url.unwrap_or(cfg.api_url);
    let tokens = Arc::new(StaticToken::new(token.or(cfg.access_token)));
    let client = RateLimitClient::new(&base_url, tokens).context("invalid API base URL")?;

    let toasts = Arc::new(ToastLog::default());
    let mut dashboard = Dashboard::new(Arc::new(client), toasts.clone());
    let phase = dashboard.set_time_range(range).await;

    for message in toasts.messages() {
        eprintln!("! {}", message);
    }

    let mut criteria = FilterCriteria::default();
    for f in features {
        criteria = criteria.feature(f);
    }
    if let Some(text) = search {
        criteria = criteria.search(text);
    }

    println!(
        "{}",
        render::render_dashboard(dashboard.snapshot(), dashboard.time_range(), &criteria)
    );

    if phase == Phase::Error {
        anyhow::bail!("every dashboard section failed to load");
    }
    Ok(())
}

async fn run_rollup(cfg: &config::Config, hour: Option<&str>) -> anyhow::Result<()> {
    let hour_start = match hour {
        Some(raw) => hour_floor(
            DateTime::parse_from_rfc3339(raw)
                .with_context(|| format!("invalid --hour '{}'", raw))?
                .with_timezone(&Utc),
        ),
        None => hour_floor(Utc::now()) - chrono::Duration::hours(1),
    };

    let store = PgStore::connect(&cfg.database_url).await?;
    let written = store.rollup_hour(hour_start).await?;
    println!("Rolled up {} buckets for {}", written, hour_start.to_rfc3339());
    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}
