//! Serve command - runs the HTTP server

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use crate::api::{create_router_with_state, AppState};
use crate::config::AppConfig;
use crate::infrastructure::cache::CacheFactory;
use crate::infrastructure::logging;
use crate::infrastructure::session::SessionService;

/// Run the HTTP server
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load().unwrap_or_default();
    logging::init_logging(&config.logging)?;

    let state = create_app_state(&config).await?;
    let app = create_router_with_state(state);

    let addr = build_socket_addr(&config)?;
    info!("Starting server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Builds the shared cache and a session service over a child view of it
pub async fn create_app_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let cache = CacheFactory::new()
        .create(&config.cache.to_cache_config()?)
        .await?;

    let session_cache = cache.child_shared(&config.session.key_prefix);
    let sessions = SessionService::new(session_cache, config.session.to_session_options());

    Ok(AppState::new(cache, sessions))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

fn build_socket_addr(config: &AppConfig) -> anyhow::Result<SocketAddr> {
    Ok(SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::domain::cache::Cache;
    use crate::domain::session::MemoryCookieJar;

    #[test]
    fn test_build_socket_addr() {
        let config = AppConfig::default();
        let addr = build_socket_addr(&config).unwrap();
        assert_eq!(addr.port(), 8080);

        let mut bad = AppConfig::default();
        bad.server.host = "not-an-ip".to_string();
        assert!(build_socket_addr(&bad).is_err());
    }

    #[tokio::test]
    async fn test_session_namespace_nested_under_cache_prefix() {
        let mut config = AppConfig::default();
        config.cache.key_prefix = "app:".to_string();

        let state = create_app_state(&config).await.unwrap();
        assert_eq!(state.cache.key_prefix(), "app:");
        assert_eq!(state.sessions.cache().key_prefix(), "app:session:");
    }

    #[tokio::test]
    async fn test_sessions_share_the_app_cache_store() {
        let state = create_app_state(&AppConfig::default()).await.unwrap();

        let mut jar = MemoryCookieJar::new();
        let mut session = state.sessions.load(&mut jar).await.unwrap();
        session.write("foo", "bar").unwrap();
        assert!(state.sessions.persist(&mut session).await);

        let stored_key = format!("session:{}", session.id());
        assert_eq!(
            state.cache.get(&stored_key).await.unwrap(),
            Some(json!({"foo": "bar"}))
        );

        state.cache.clear_pattern("session:*").await.unwrap();
        assert!(state.sessions.cache().get(session.id()).await.unwrap().is_none());
    }
}
