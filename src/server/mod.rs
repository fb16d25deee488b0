//! An HTTP frontend running every request through an [`Authenticator`]. This module is only
//! available if the `server` feature is enabled

mod filters;
mod handlers;
mod reply;

pub mod routes;

pub use filters::{Authenticated, Endpoint};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::error;

use crate::authenticator::Authenticator;

pub const TOML_MIME_TYPE: &str = "application/toml";
pub const JSON_MIME_TYPE: &str = "application/json";

/// The configuration required for running with TLS enabled
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Returns a future that runs a server until it receives a SIGINT to stop. If optional TLS
/// configuration is given, the server will be configured to use TLS. Otherwise it will use plain
/// HTTP
pub async fn server(
    authenticator: Arc<Authenticator>,
    addr: impl Into<SocketAddr> + 'static,
    tls: Option<TlsConfig>,
) -> anyhow::Result<()> {
    match tls {
        None => {
            let api = routes::api(authenticator, "http");
            warp::serve(api)
                .try_bind_with_graceful_shutdown(addr, shutdown_signal())?
                .1
                .await
        }
        Some(config) => {
            let api = routes::api(authenticator, "https");
            warp::serve(api)
                .tls()
                .key_path(config.key_path)
                .cert_path(config.cert_path)
                .bind_with_graceful_shutdown(addr, shutdown_signal())
                .1
                .await
        }
    };
    Ok(())
}

async fn shutdown_signal() {
    // Wait for the CTRL+C signal
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Unable to listen for the shutdown signal, running until killed");
        std::future::pending::<()>().await
    }
}
