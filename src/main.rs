use std::sync::Arc;
use std::time::Duration;
use visits_summary::api::auth::TokenAccess;
use visits_summary::api::visits::AppState;
use visits_summary::config::Config;
use visits_summary::query::cache::QueryCache;
use visits_summary::query::summary::VisitsSummary;
use visits_summary::server;
use visits_summary::storage::archive::DuckDbArchive;
use visits_summary::storage::import::import_json_lines;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "visits_summary=info,tower_http=info".into());
    let json = std::env::var("VISITS_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("import") => match args.get(1) {
            Some(file) => run_import(file, args.get(2).map(String::as_str)),
            None => Err("usage: visits-summary import <file.jsonl> [config.toml]".into()),
        },
        config_path => run(config_path).await,
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "Fatal error");
        std::process::exit(1);
    }
}

/// Load a JSON Lines file of archive values. The server holds the DuckDB
/// file lock, so this runs while it is stopped.
fn run_import(file: &str, config_path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(config_path.map(std::path::Path::new));
    std::fs::create_dir_all(&config.data_dir)
        .map_err(|e| format!("Failed to create data directory: {e}"))?;
    let archive = DuckDbArchive::open(&config.archive_path())
        .map_err(|e| format!("Failed to open archive: {e}"))?;

    let reader = std::io::BufReader::new(
        std::fs::File::open(file).map_err(|e| format!("Failed to open {file}: {e}"))?,
    );
    let written = import_json_lines(&archive, reader, chrono::Utc::now().date_naive())?;
    tracing::info!(file, values = written, "Import finished");
    Ok(())
}

async fn run(config_path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(config_path.map(std::path::Path::new));

    tracing::info!(
        host = %config.host,
        port = config.port,
        data_dir = %config.data_dir.display(),
        "Starting visits summary API"
    );

    std::fs::create_dir_all(&config.data_dir)
        .map_err(|e| format!("Failed to create data directory: {e}"))?;
    let archive = DuckDbArchive::open(&config.archive_path())
        .map_err(|e| format!("Failed to open archive: {e}"))?;

    let access = TokenAccess::from_config(&config);
    let access_open = access.is_open();
    if access_open {
        tracing::warn!(
            "No anonymous sites or tokens configured; every site is readable without a token"
        );
    }

    let summary = VisitsSummary::new(
        Arc::new(archive),
        Arc::new(access),
        config.enable_unique_visitors_year_and_range,
    );
    let query_cache = QueryCache::new(config.cache_ttl_secs, config.cache_max_entries);

    // Periodic purge of expired report bodies
    if config.cache_ttl_secs > 0 {
        let cleanup_cache = query_cache.clone();
        let period = Duration::from_secs(config.cache_ttl_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let removed = cleanup_cache.cleanup_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Expired report cache entries purged");
                }
            }
        });
    }

    let state = Arc::new(AppState::new(
        summary,
        query_cache,
        config.dashboard_origin.clone(),
        access_open,
    ));

    let app = server::build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Failed to bind to {addr}: {e}"))?;

    tracing::info!(addr = %addr, "Listening");
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. In-flight requests get `timeout` to finish
/// before the process exits.
async fn shutdown_signal(timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!(
        timeout_secs = timeout.as_secs(),
        "Shutdown signal received, draining connections"
    );
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        tracing::warn!("Graceful shutdown timed out, exiting");
        std::process::exit(1);
    });
}
