use std::{future::IntoFuture, process, sync::Arc};

use tavern::{
    application::{
        cafes::CafeService,
        error::AppError,
        repos::{CafesWriteRepo, UsersWriteRepo},
        users::UserService,
    },
    cache::{CacheBackend, CacheConfig, CacheLayer, MemoryBackend},
    config::{self, CacheBackendKind},
    domain::entities::{CafeMemberRecord, CafeRecord, UserRecord},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AppState},
        memory::InMemoryStore,
        telemetry,
    },
};
use tokio::sync::Notify;
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
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| InfraError::configuration("migrate requires database.url"))?;
    let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    info!(target = "tavern::migrate", "Migrations applied");
    Ok(())
}

async fn init_backend(settings: &config::CacheSettings) -> Result<Arc<dyn CacheBackend>, AppError> {
    match settings.backend {
        CacheBackendKind::Memory => Ok(Arc::new(MemoryBackend::from_config(
            &CacheConfig::from(settings),
        ))),
        #[cfg(feature = "redis")]
        CacheBackendKind::Redis => {
            let url = settings
                .redis_url
                .as_deref()
                .ok_or_else(|| InfraError::configuration("cache.redis_url is required"))?;
            let backend = tavern::cache::RedisBackend::connect(url)
                .await
                .map_err(InfraError::from)?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "redis"))]
        CacheBackendKind::Redis => Err(InfraError::configuration(
            "cache.backend = \"redis\" requires building with the `redis` feature",
        )
        .into()),
    }
}

async fn build_state(settings: &config::Settings, layer: &CacheLayer) -> Result<AppState, AppError> {
    match settings.database.url.as_deref() {
        Some(url) => {
            let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
                .await
                .map_err(|err| InfraError::database(err.to_string()))?;
            let repositories = Arc::new(PostgresRepositories::new(pool, layer.hooks()));
            info!(target = "tavern::startup", "Using Postgres store");

            let users = layer.query::<UserRecord>(Arc::new(repositories.store::<UserRecord>()));
            let cafes = layer.query::<CafeRecord>(Arc::new(repositories.store::<CafeRecord>()));
            let members = layer.query::<CafeMemberRecord>(Arc::new(repositories.store::<CafeMemberRecord>()));
            let users_writer: Arc<dyn UsersWriteRepo> = repositories.clone();
            let cafes_writer: Arc<dyn CafesWriteRepo> = repositories.clone();

            Ok(AppState {
                users: UserService::new(users.clone(), users_writer),
                cafes: CafeService::new(cafes, users, members, cafes_writer),
                database: Some(repositories),
            })
        }
        None => {
            warn!(
                target = "tavern::startup",
                "database.url not set; using the in-process store"
            );
            let user_store = Arc::new(InMemoryStore::<UserRecord>::new());
            let cafe_store = Arc::new(InMemoryStore::<CafeRecord>::new());
            let member_store = Arc::new(InMemoryStore::<CafeMemberRecord>::new());
            user_store.subscribe(Arc::new(layer.hooks()));
            cafe_store.subscribe(Arc::new(layer.hooks()));
            member_store.subscribe(Arc::new(layer.hooks()));

            let users = layer.query::<UserRecord>(user_store.clone());
            Ok(AppState {
                users: UserService::new(users.clone(), user_store),
                cafes: CafeService::new(
                    layer.query::<CafeRecord>(cafe_store.clone()),
                    users,
                    layer.query::<CafeMemberRecord>(member_store),
                    cafe_store,
                ),
                database: None,
            })
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let backend = init_backend(&settings.cache).await?;
    let layer = CacheLayer::new(backend, CacheConfig::from(&settings.cache));
    let state = build_state(&settings, &layer).await?;
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "tavern::startup",
        addr = %settings.server.addr,
        namespace = %layer.config().namespace,
        "Listening"
    );

    let stopping = Arc::new(Notify::new());
    let signal = Arc::clone(&stopping);
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal.notify_one();
        })
        .into_future();
    let grace = settings.server.graceful_shutdown;

    tokio::select! {
        result = server => result.map_err(InfraError::from)?,
        _ = async {
            stopping.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "tavern::shutdown",
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
        }
    }

    info!(target = "tavern::shutdown", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(target = "tavern::shutdown", error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!(target = "tavern::shutdown", "Shutdown signal received");
}
