//! HTTP client for the peer executor endpoints.
//!
//! Wraps `GET /ram` and `POST /execute_function` using [`reqwest`]. Every
//! request carries an explicit timeout.

use std::{fmt, net::IpAddr, net::SocketAddr, time::Duration};

use serde_json::Value;

use crate::{
    config::EngineConfig,
    error::{DispatchErrorKind, EngineError, Result},
    job::{ExecuteRequest, ExecuteResponse, RamReport},
};

/// Errors from a single round trip to a peer.
#[derive(Debug)]
pub enum ClientError {
    /// The HTTP request itself failed (connect, timeout, reset...).
    Request(reqwest::Error),
    /// The peer answered with a non-2xx status or an error payload.
    Remote { status: u16, body: String },
    /// The peer answered 2xx but the body is not what was expected.
    Decode(String),
}

impl ClientError {
    /// Classifies the error for dispatch bookkeeping.
    pub fn kind(&self) -> DispatchErrorKind {
        match self {
            Self::Request(e) if e.is_timeout() => DispatchErrorKind::Timeout,
            Self::Request(_) => DispatchErrorKind::Network,
            Self::Remote { status, .. } => DispatchErrorKind::Remote { status: *status },
            Self::Decode(_) => DispatchErrorKind::Decode,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(e) => write!(f, "HTTP request failed: {e}"),
            Self::Remote { status, body } => write!(f, "peer error ({status}): {body}"),
            Self::Decode(msg) => write!(f, "invalid response body: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if !e.is_timeout() && e.is_decode() {
            return Self::Decode(e.to_string());
        }
        Self::Request(e)
    }
}

/// HTTP client shared by discovery and dispatch.
///
/// Cheap to clone, clones share the connection pool.
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    port: u16,
    endpoint: String,
    probe_timeout: Duration,
    dispatch_timeout: Duration,
}

impl PeerClient {
    /// Creates a new `PeerClient`.
    ///
    /// # Arguments
    /// * `config` - The engine configuration providing port, endpoint and timeouts.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the underlying HTTP client cannot be built.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.probe_timeout)
            .build()
            .map_err(|e| EngineError::InvalidConfig(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            port: config.port,
            endpoint: config.endpoint.clone(),
            probe_timeout: config.probe_timeout,
            dispatch_timeout: config.dispatch_timeout,
        })
    }

    /// Base URL for `address`, appending the default port if it carries none.
    pub fn base_url(&self, address: &str) -> String {
        if address.parse::<SocketAddr>().is_ok() {
            return format!("http://{address}");
        }

        match address.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("http://[{ip}]:{}", self.port),
            Ok(IpAddr::V4(ip)) => format!("http://{ip}:{}", self.port),
            Err(_) => match address.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
                    format!("http://{address}")
                }
                _ => format!("http://{address}:{}", self.port),
            },
        }
    }

    /// Asks a peer for its memory report.
    ///
    /// Sends a `GET /ram` bounded by the probe timeout. A successful answer
    /// doubles as the liveness check.
    pub async fn probe_ram(&self, address: &str) -> std::result::Result<RamReport, ClientError> {
        let response = self
            .http
            .get(format!("{}/ram", self.base_url(address)))
            .timeout(self.probe_timeout)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.json::<RamReport>().await?)
    }

    /// Submits one partition to a peer and returns its `result` value.
    ///
    /// Sends a `POST` to the configured job endpoint bounded by the dispatch
    /// timeout. A 2xx answer carrying an `error` field is reported as a
    /// remote failure.
    pub async fn execute(
        &self,
        address: &str,
        request: &ExecuteRequest,
    ) -> std::result::Result<Value, ClientError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url(address), self.endpoint))
            .timeout(self.dispatch_timeout)
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let response = Self::ensure_success(response).await?;
        let body = response.json::<ExecuteResponse>().await?;

        match body.error {
            Some(body) => Err(ClientError::Remote { status, body }),
            None => Ok(body.result),
        }
    }

    /// Returns the response unchanged on success, or a [`ClientError::Remote`]
    /// holding the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> std::result::Result<reqwest::Response, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::Remote {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> PeerClient {
        PeerClient::new(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn base_url_appends_default_port() {
        let client = client();
        assert_eq!(client.base_url("10.0.0.7"), "http://10.0.0.7:5000");
        assert_eq!(client.base_url("node-3"), "http://node-3:5000");
        assert_eq!(client.base_url("::1"), "http://[::1]:5000");
    }

    #[test]
    fn base_url_keeps_explicit_port() {
        let client = client();
        assert_eq!(client.base_url("127.0.0.1:4100"), "http://127.0.0.1:4100");
        assert_eq!(client.base_url("node-3:8080"), "http://node-3:8080");
        assert_eq!(client.base_url("[::1]:9000"), "http://[::1]:9000");
    }

    #[test]
    fn remote_errors_keep_their_status() {
        let err = ClientError::Remote {
            status: 503,
            body: "busy".into(),
        };
        assert_eq!(err.kind(), DispatchErrorKind::Remote { status: 503 });
        assert_eq!(ClientError::Decode("x".into()).kind(), DispatchErrorKind::Decode);
    }

    #[tokio::test]
    async fn stalled_bodies_are_timeouts() {
        use tokio::{
            io::{AsyncReadExt, AsyncWriteExt},
            net::TcpListener,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await.unwrap();
            let head = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 64\r\n\r\n{\"res";
            socket.write_all(head.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config = EngineConfig {
            dispatch_timeout: Duration::from_millis(100),
            ..EngineConfig::default()
        };
        let client = PeerClient::new(&config).unwrap();
        let request = crate::job::Job::new(crate::job::Operation::Sum).request(Value::Null);

        let err = client.execute(&addr, &request).await.unwrap_err();
        assert_eq!(err.kind(), DispatchErrorKind::Timeout);
    }
}
