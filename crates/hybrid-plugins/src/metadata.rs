//! Minimal client for cloud instance metadata services.

use std::time::Duration;

use hybrid_core::PluginError;
use reqwest::Method;
use tracing::debug;

use crate::error::EvidenceError;

/// Default request timeout for metadata services.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// HTTP client bound to one metadata endpoint.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    http: reqwest::Client,
    endpoint: String,
}

impl MetadataClient {
    /// Creates a client for `endpoint` (scheme and host, no trailing path).
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self, PluginError> {
        if timeout_secs == 0 {
            return Err(PluginError::invalid_config(
                "timeout_secs must be greater than 0",
            ));
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(PluginError::invalid_config(format!(
                "endpoint must start with http:// or https://, got '{endpoint}'"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .no_proxy()
            .build()
            .map_err(|e| PluginError::invalid_config(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// The endpoint requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `GET` a metadata path and return the body.
    ///
    /// `query` pairs are percent-encoded and appended to `path`.
    pub async fn get(
        &self,
        what: &'static str,
        path: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<String, EvidenceError> {
        self.request(Method::GET, what, path, query, headers).await
    }

    /// `PUT` a metadata path and return the body.
    pub async fn put(
        &self,
        what: &'static str,
        path: &str,
        headers: &[(&str, &str)],
    ) -> Result<String, EvidenceError> {
        self.request(Method::PUT, what, path, &[], headers).await
    }

    async fn request(
        &self,
        method: Method,
        what: &'static str,
        path: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<String, EvidenceError> {
        let url = format!("{}{path}", self.endpoint);
        debug!(%method, %url, params = query.len(), "querying metadata service");

        let mut request = self.http.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let body = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|source| EvidenceError::Http { what, source })?
            .text()
            .await
            .map_err(|source| EvidenceError::Http { what, source })?;

        if body.trim().is_empty() {
            return Err(EvidenceError::MalformedResponse {
                what,
                reason: "empty body".to_string(),
            });
        }
        Ok(body)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned-response HTTP server for plugin tests.

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A route: request line prefix (e.g. `"GET /path"`), status, body.
    pub type Route = (&'static str, u16, &'static str);

    /// Serve `routes` on a random local port.
    ///
    /// Returns the base URL and a channel carrying each raw request head.
    pub async fn serve(routes: Vec<Route>) -> (String, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&buf).to_string();
                let _ = seen_tx.send(request.clone());

                let (status, body) = routes
                    .iter()
                    .find(|(prefix, _, _)| request.starts_with(prefix))
                    .map_or((404, ""), |(_, status, body)| (*status, *body));
                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}"), seen_rx)
    }
}
