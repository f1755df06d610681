//! Local test-page file server.
//!
//! Serves the configured root directory over HTTP on an ephemeral
//! localhost port so test pages and fixture files can be navigated to,
//! plus a built-in blank start page for specs that do not name one.
//! Started once per run and stopped unconditionally at run end.

use crate::result::{CruzarError, CruzarResult};
use axum::http::Uri;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::sync::{oneshot, Mutex};
use tower_http::services::ServeDir;

/// Route of the built-in blank start page
pub const BLANK_PAGE_ROUTE: &str = "__cruzar/blank-page.html";

const BLANK_PAGE_HTML: &str =
    "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>blank page</title></head>\n<body></body>\n</html>\n";

struct ServerHandle {
    addr: SocketAddr,
    root: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        // Last-resort release when the owner goes away without stop()
        self.task.abort();
    }
}

/// HTTP server over the run's root directory
pub struct FileServer {
    state: Mutex<Option<ServerHandle>>,
}

impl Default for FileServer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FileServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileServer").finish_non_exhaustive()
    }
}

impl FileServer {
    /// Create a stopped server
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    /// Start serving `root` on localhost. `port` of `None` binds an
    /// ephemeral port. Starting twice is an error.
    pub async fn start(&self, root: PathBuf, port: Option<u16>) -> CruzarResult<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(CruzarError::Server {
                message: "Http server is already running".to_string(),
            });
        }

        let app = Router::new()
            .route(
                &format!("/{BLANK_PAGE_ROUTE}"),
                get(|| async { Html(BLANK_PAGE_HTML) }),
            )
            .fallback_service(ServeDir::new(root.clone()));

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port.unwrap_or(0)))
            .await
            .map_err(|e| CruzarError::Server {
                message: format!("failed to bind: {e}"),
            })?;
        let addr = listener.local_addr().map_err(|e| CruzarError::Server {
            message: format!("failed to resolve local address: {e}"),
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        tracing::debug!(%addr, "file server started");
        *state = Some(ServerHandle {
            addr,
            root,
            shutdown: Some(shutdown_tx),
            task,
        });
        Ok(())
    }

    /// Stop the server; idempotent
    pub async fn stop(&self) {
        let handle = self.state.lock().await.take();
        if let Some(mut handle) = handle {
            if let Some(shutdown) = handle.shutdown.take() {
                let _ = shutdown.send(());
            }
            let _ = (&mut handle.task).await;
            tracing::debug!(addr = %handle.addr, "file server stopped");
        }
    }

    /// Whether the server is running
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Base URL, `None` when stopped
    pub async fn base_url(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .as_ref()
            .map(|h| format!("http://localhost:{}/", h.addr.port()))
    }

    /// URL serving the given file. Absolute paths are relativized
    /// against the served root; `None` when stopped.
    pub async fn url_for(&self, path: impl AsRef<Path>) -> Option<String> {
        let state = self.state.lock().await;
        let handle = state.as_ref()?;
        let path = path.as_ref();
        let relative = if path.is_absolute() {
            path.strip_prefix(&handle.root).unwrap_or(path)
        } else {
            path
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Some(format!(
            "http://localhost:{}/{relative}",
            handle.addr.port()
        ))
    }

    /// URL of the built-in blank start page
    pub async fn blank_page_url(&self) -> Option<String> {
        self.url_for(BLANK_PAGE_ROUTE).await
    }

    /// Whether a URL points at this server: the port matches and the
    /// host is a localhost form
    pub async fn is_own_url(&self, url: &str) -> bool {
        let state = self.state.lock().await;
        let Some(handle) = state.as_ref() else {
            return false;
        };
        let Ok(uri) = url.parse::<Uri>() else {
            return false;
        };
        let port_matches = uri.port_u16() == Some(handle.addr.port());
        let host_matches = matches!(uri.host(), Some("localhost" | "127.0.0.1"));
        port_matches && host_matches
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let server = FileServer::new();
        assert!(!server.is_running().await);
        assert!(server.base_url().await.is_none());

        server.start(PathBuf::from("."), None).await.unwrap();
        assert!(server.is_running().await);
        assert!(server.base_url().await.is_some());

        server.stop().await;
        assert!(!server.is_running().await);

        // stop is idempotent
        server.stop().await;
        assert!(!server.is_running().await);
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let server = FileServer::new();
        server.start(PathBuf::from("."), None).await.unwrap();
        let err = server.start(PathBuf::from("."), None).await.unwrap_err();
        assert!(err.to_string().contains("already running"));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_url_for_relativizes_against_root() {
        let dir = tempfile::tempdir().unwrap();
        let server = FileServer::new();
        server.start(dir.path().to_path_buf(), None).await.unwrap();

        let url = server
            .url_for(dir.path().join("pages/index.html"))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:"));
        assert!(url.ends_with("/pages/index.html"));

        let url = server.url_for("pages/index.html").await.unwrap();
        assert!(url.ends_with("/pages/index.html"));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_is_own_url_matches_port_and_localhost() {
        let server = FileServer::new();
        server.start(PathBuf::from("."), None).await.unwrap();
        let base = server.base_url().await.unwrap();
        let port = base
            .trim_start_matches("http://localhost:")
            .trim_end_matches('/')
            .to_string();

        assert!(server.is_own_url(&format!("http://localhost:{port}/a.html")).await);
        assert!(server.is_own_url(&format!("http://127.0.0.1:{port}/a.html")).await);
        assert!(!server.is_own_url(&format!("http://example.com:{port}/a.html")).await);
        assert!(!server.is_own_url("http://localhost:1/a.html").await);
        assert!(!server.is_own_url("not a url").await);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_blank_page_url_uses_reserved_route() {
        let server = FileServer::new();
        server.start(PathBuf::from("."), None).await.unwrap();
        let url = server.blank_page_url().await.unwrap();
        assert!(url.ends_with(BLANK_PAGE_ROUTE));
        server.stop().await;
    }
}
