//! Worker registration readiness.
//!
//! Before the first navigation the page's background worker must be
//! registered. Headless, "registered" means the worker script is reachable
//! through the gateway with our credentials; [`AssetProbe`] checks exactly
//! that and remembers a success.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
}

#[async_trait]
pub trait WorkerRegistrar: Send + Sync {
    async fn register(&self) -> Result<(), ReadinessError>;
}

/// Readiness check that fetches the worker script from the gateway.
pub struct AssetProbe {
    http: reqwest::Client,
    url: String,
    credentials: Option<(String, String)>,
    registered: AtomicBool,
}

impl AssetProbe {
    pub fn new(url: String, credentials: Option<(String, String)>) -> Result<Self, ReadinessError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            url,
            credentials,
            registered: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl WorkerRegistrar for AssetProbe {
    async fn register(&self) -> Result<(), ReadinessError> {
        if self.registered.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut request = self.http.get(&self.url);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ReadinessError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        debug!(url = %self.url, "worker script reachable");
        self.registered.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Answers every connection with `status`, reporting each request head.
    async fn fixed_server(status: &'static str) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let _ = tx.send(String::from_utf8_lossy(&buf[..n]).to_string());
                let body = "ok";
                let reply = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(reply.as_bytes()).await;
            }
        });
        (format!("http://{addr}/uidfhsuid/sw.js"), rx)
    }

    #[tokio::test]
    async fn reachable_script_registers_once() {
        let (url, mut requests) = fixed_server("200 OK").await;
        let probe = AssetProbe::new(url, Some(("alice".into(), "hunter2".into()))).unwrap();

        probe.register().await.unwrap();
        probe.register().await.unwrap();

        let head = requests.recv().await.unwrap();
        assert!(head.starts_with("GET /uidfhsuid/sw.js"));
        assert!(head.contains("Basic YWxpY2U6aHVudGVyMg=="), "{head}");
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_script_is_an_error() {
        let (url, _requests) = fixed_server("401 Unauthorized").await;
        let probe = AssetProbe::new(url, None).unwrap();
        match probe.register().await {
            Err(ReadinessError::Status { status, .. }) => assert_eq!(status, 401),
            other => panic!("expected status error, got {other:?}"),
        }
    }
}
