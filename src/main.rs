use std::{process, sync::Arc, time::Duration};

use alphafeed::{
    application::{
        enrichment::{EnrichmentClient, MarketDataSource},
        error::AppError,
        mentions::MentionService,
        ranking::RankingEngine,
        repos::MentionsRepo,
        trending::{TrendingPolicy, TrendingService},
    },
    cache::{CacheConfig, CacheStore, MemoryCacheStore, RevalidationCoordinator},
    config::{self, CacheBackend},
    infra::{
        db::{PostgresCacheStore, PostgresRepositories},
        dexscreener::DexScreenerSource,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use sqlx::PgPool;
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => {
            connect_database(&settings).await?;
            info!(target: "alphafeed::migrate", "migrations applied");
            Ok(())
        }
    }
}

async fn connect_database(settings: &config::Settings) -> Result<PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool =
        PostgresRepositories::connect(database_url, settings.database.max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(pool)
}

struct ApplicationContext {
    http_state: HttpState,
    store: Arc<dyn CacheStore>,
    coordinator: Arc<RevalidationCoordinator>,
    cache_config: CacheConfig,
}

fn build_application_context(
    pool: PgPool,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let repositories = Arc::new(PostgresRepositories::new(pool.clone()));
    let mentions_repo: Arc<dyn MentionsRepo> = repositories;

    let enrichment = if settings.enrichment.enabled {
        let source: Arc<dyn MarketDataSource> = Arc::new(DexScreenerSource::new(
            settings.enrichment.base_url.clone(),
            settings.enrichment.timeout,
        )?);
        EnrichmentClient::new(
            source,
            settings.enrichment.ttl,
            settings.enrichment.cache_limit,
        )
    } else {
        info!(target: "alphafeed::startup", "market data enrichment disabled");
        EnrichmentClient::disabled()
    };

    let cache_config = CacheConfig::from(&settings.cache);
    let store: Arc<dyn CacheStore> = match settings.cache.backend {
        CacheBackend::Postgres => Arc::new(PostgresCacheStore::new(pool)),
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new(&cache_config)),
    };

    let engine = Arc::new(RankingEngine::new(
        mentions_repo.clone(),
        Arc::new(enrichment),
    ));
    let coordinator = Arc::new(RevalidationCoordinator::new(
        engine.clone(),
        store.clone(),
        cache_config.clone(),
    ));
    let trending = Arc::new(TrendingService::new(
        engine,
        store.clone(),
        coordinator.clone(),
        cache_config.clone(),
    ));
    let mentions = Arc::new(MentionService::new(mentions_repo));

    let http_state = HttpState {
        trending,
        mentions,
        policy: TrendingPolicy::from(&settings.trending),
    };

    Ok(ApplicationContext {
        http_state,
        store,
        coordinator,
        cache_config,
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect_database(&settings).await?;
    let app = build_application_context(pool, &settings)?;

    let janitor = spawn_cache_janitor(app.store.clone(), settings.cache.janitor_interval);

    let result = serve_http(&settings, app.http_state).await;

    let abandoned = app
        .coordinator
        .shutdown(app.cache_config.shutdown_grace)
        .await;
    if abandoned > 0 {
        warn!(
            target: "alphafeed::shutdown",
            abandoned,
            "revalidations cancelled at shutdown"
        );
    }

    janitor.abort();
    let _ = janitor.await;

    result
}

fn spawn_cache_janitor(store: Arc<dyn CacheStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!(target: "alphafeed::cache", purged, "purged expired cache entries"),
                Err(err) => warn!(target: "alphafeed::cache", error = %err, "cache purge failed"),
            }
        }
    })
}

async fn serve_http(settings: &config::Settings, http_state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(http_state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(target: "alphafeed::startup", addr = %settings.server.addr, "listening");

    let stopping = Arc::new(Notify::new());
    let signal = {
        let stopping = stopping.clone();
        async move {
            shutdown_signal().await;
            stopping.notify_one();
        }
    };
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(signal);

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = async move { server.await } => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = async {
            stopping.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target: "alphafeed::shutdown",
                grace_secs = grace.as_secs(),
                "open connections did not drain in time"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target: "alphafeed::shutdown", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(target: "alphafeed::shutdown", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target: "alphafeed::shutdown", "shutdown signal received");
}
