use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use authgate::core::auth::{
    AuthApiState, AuthService, JwtService, PasswordHasher, SlidingWindowLimiter, auth_api_router,
};
use authgate::core::config::Config;
use authgate::core::db::{
    InMemoryUserRepository, UserRepository, UserStore, create_pool_with_migrations,
};
use axum::http::{HeaderValue, Method, header};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// How often stale login attempts are dropped from the limiter
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("authgate=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();

    // Refuse to start without both token secrets
    let jwt_service = JwtService::from_env().inspect_err(|e| {
        tracing::error!("Invalid token configuration: {}", e);
    })?;

    // Log config status (without revealing secrets)
    tracing::info!(
        "Config loaded: database={}, production={}, bcrypt_cost={}, admins={}",
        config.has_database(),
        config.production,
        config.bcrypt_cost,
        config.admin_emails.len()
    );

    let users: Arc<dyn UserStore> = match config.db_config() {
        Some(db_config) => {
            let pool = create_pool_with_migrations(&db_config).await?;
            Arc::new(UserRepository::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, users are kept in memory only");
            Arc::new(InMemoryUserRepository::new())
        }
    };

    let limiter = SlidingWindowLimiter::new(config.login_max_attempts, config.login_window);

    let auth_service = AuthService::new(users, jwt_service)
        .with_password_hasher(PasswordHasher::new(config.bcrypt_cost))
        .with_login_limiter(limiter.clone())
        .with_admin_emails(config.admin_emails.clone());

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            limiter.prune();
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(config.cors_origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    let app = auth_api_router(AuthApiState {
        auth_service,
        secure_cookie: config.production,
    })
    .layer(cors)
    .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
