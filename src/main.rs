use stagehouse_cms::{
    AppState,
    cache,
    config::{AppConfig, Env},
    create_router,
    mailer::{HttpMailer, LogMailer, MailerState},
    models::EmailAddress,
    repository::{ContentState, CredentialState, PostgresRepository},
    session,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, initializes logging, opens the store, the cache and
/// the mailer, then serves HTTP until Ctrl-C.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast on missing production secrets)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins over the default filter.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stagehouse_cms=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Store: connect and migrate.
    let repo = match PostgresRepository::open(&config.db_url, config.db_max_connections).await {
        Ok(repo) => Arc::new(repo),
        Err(e) => {
            tracing::error!(error = %e, "FATAL: could not open the store. Check DATABASE_URL.");
            return;
        }
    };
    let credentials = repo.clone() as CredentialState;
    let content = repo.clone() as ContentState;

    // Optional first admin, for deployments with no accounts yet.
    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        let seeded = match EmailAddress::parse(email) {
            Ok(email) => session::seed_admin(&credentials, &email, password.clone()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = seeded {
            tracing::error!(error = %e, "FATAL: could not seed the admin account. Check ADMIN_EMAIL and ADMIN_PASSWORD.");
            repo.close().await;
            return;
        }
    }

    // 4. Cache: Valkey when configured and reachable, in-process otherwise.
    let cache_store = cache::connect(config.cache_url.as_deref()).await;

    // 5. Mailer
    let mailer: MailerState = match &config.mailer_url {
        Some(url) => Arc::new(HttpMailer::new(url.clone(), config.mailer_api_key.clone())),
        None => {
            tracing::warn!("MAILER_URL not set; recovery codes are written to the log");
            Arc::new(LogMailer)
        }
    };

    // 6. State and router
    let addr = format!("0.0.0.0:{}", config.port);
    let app_state = AppState::new(credentials, content, cache_store, mailer, config);
    let app = create_router(app_state);

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "FATAL: could not bind");
            repo.close().await;
            return;
        }
    };

    tracing::info!("Listening on {addr}");
    tracing::info!("API Documentation (Swagger UI) available at: http://{addr}/swagger-ui");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
    }

    // In-flight requests have drained; release the pool.
    repo.close().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
