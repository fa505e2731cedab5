use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use user_policy::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    repository::{InMemoryUserStore, StoreState},
};

/// main
///
/// Loads configuration, initializes logging, wires the policy layer around the
/// backing store, provisions the bootstrap admin and serves HTTP.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast on missing production secrets)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG, else crate-level debug
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "user_policy=debug,tower_http=info".into());

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

    // 3. Backing store. The policy layer only sees the `UserStore` trait.
    let store = Arc::new(InMemoryUserStore::new()) as StoreState;

    // 4. State assembly (role registry is validated here)
    let app_state = AppState::build(config.clone(), store)
        .unwrap_or_else(|e| panic!("FATAL: cannot initialize user policy: {e}"));

    // 5. Bootstrap administrator
    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        app_state
            .service
            .provision_admin(email, password)
            .await
            .unwrap_or_else(|e| panic!("FATAL: cannot provision bootstrap admin: {e}"));
    }

    // 6. Router and server startup
    let app = create_router(app_state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("FATAL: cannot bind {}: {e}", config.bind_addr));

    tracing::info!("Listening on {}", config.bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at /swagger-ui");

    axum::serve(listener, app).await.unwrap();
}
