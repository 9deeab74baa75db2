// SPDX-License-Identifier: AGPL-3.0-or-later
//! Public placeholder server
//!
//! The hosting platform kills instances with nothing listening on `PORT`. The wiki
//! itself is only reachable over the tailnet, so the public port serves a greeting.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::{Result, TailwikiError};

/// Body served on `/`
pub fn greeting(name: &str, hostname: &str) -> String {
    format!("Welcome, {}! Hello from {}", name, hostname)
}

/// This machine's hostname, lossily converted
pub fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// Turn a Go-style `:port` into an all-interfaces socket address string
pub fn listen_addr(bind_addr: &str) -> String {
    if bind_addr.starts_with(':') {
        format!("0.0.0.0{}", bind_addr)
    } else {
        bind_addr.to_string()
    }
}

/// Router answering every method on `/` with the greeting
pub fn router(greeting: impl Into<Arc<str>>) -> Router {
    Router::new()
        .route("/", any(greet))
        .with_state(greeting.into())
}

async fn greet(State(greeting): State<Arc<str>>) -> String {
    greeting.to_string()
}

/// Bound, not yet serving, public listener
pub struct PublicServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl PublicServer {
    /// Bind `bind_addr` (`:80`, `0.0.0.0:80`, `127.0.0.1:0`, ...)
    pub async fn bind(bind_addr: &str) -> Result<Self> {
        let addr = listen_addr(bind_addr);
        let to_error = |message: String| TailwikiError::BindError {
            addr: addr.clone(),
            message,
        };

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| to_error(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| to_error(e.to_string()))?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve `router` until `shutdown` resolves
    pub async fn serve<F>(self, router: Router, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(addr = %self.local_addr, "Public placeholder server listening");

        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| TailwikiError::ServeError {
                message: e.to_string(),
            })
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[test]
    fn test_greeting_text() {
        assert_eq!(greeting("Ada", "box1"), "Welcome, Ada! Hello from box1");
    }

    #[test]
    fn test_listen_addr() {
        assert_eq!(listen_addr(":5000"), "0.0.0.0:5000");
        assert_eq!(listen_addr("127.0.0.1:8080"), "127.0.0.1:8080");
    }

    #[test]
    fn test_local_hostname_not_empty() {
        assert!(!local_hostname().is_empty());
    }

    #[tokio::test]
    async fn test_serves_greeting_on_root() {
        let server = PublicServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(server.serve(router(greeting("Ada", "box1")), async move {
            let _ = stop_rx.await;
        }));

        let body = reqwest::get(format!("http://{}/", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "Welcome, Ada! Hello from box1");

        let response = reqwest::Client::new()
            .post(format!("http://{}/", addr))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());

        let missing = reqwest::get(format!("http://{}/wiki", addr)).await.unwrap();
        assert_eq!(missing.status().as_u16(), 404);

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let first = PublicServer::bind("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().to_string();

        let result = PublicServer::bind(&taken).await;
        assert!(matches!(result, Err(TailwikiError::BindError { .. })));
    }
}
