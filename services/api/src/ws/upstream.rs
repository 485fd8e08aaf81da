//! Connection to the upstream realtime endpoint.

use crate::config::{Provider, UpstreamConfig};
use crate::error::{BridgeError, ConnectError};
use futures_util::stream::{SplitSink, SplitStream};
use kbvoice_core::Metrics;
use kbvoice_core::resilience::{CircuitBreaker, RetryPolicy};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{info, instrument, warn};

pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type UpstreamSink = SplitSink<UpstreamStream, WsMessage>;
pub type UpstreamSource = SplitStream<UpstreamStream>;

const AZURE_API_VERSION: &str = "2024-10-01-preview";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamAuth {
    /// `Authorization: Bearer <key>` plus the realtime beta header.
    Bearer(String),
    /// `api-key: <key>`.
    ApiKey(String),
    None,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamEndpoint {
    pub url: String,
    pub auth: UpstreamAuth,
}

impl UpstreamEndpoint {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        match config.provider {
            Provider::OpenAI => Self {
                url: config.url_override.clone().unwrap_or_else(|| {
                    format!(
                        "wss://api.openai.com/v1/realtime?model={}",
                        config.openai_model
                    )
                }),
                auth: config
                    .openai_api_key
                    .clone()
                    .map_or(UpstreamAuth::None, UpstreamAuth::Bearer),
            },
            Provider::Azure => Self {
                url: config.url_override.clone().unwrap_or_else(|| {
                    format!(
                        "wss://{}.openai.azure.com/openai/realtime?api-version={}&deployment={}",
                        config.azure_resource.as_deref().unwrap_or_default(),
                        AZURE_API_VERSION,
                        config.azure_deployment.as_deref().unwrap_or_default(),
                    )
                }),
                auth: config
                    .azure_api_key
                    .clone()
                    .map_or(UpstreamAuth::None, UpstreamAuth::ApiKey),
            },
        }
    }

    /// Builds the handshake request with provider auth headers.
    pub fn request(&self) -> Result<Request, ConnectError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::Refused(e.to_string()))?;
        let header = |value: &str| {
            HeaderValue::from_str(value).map_err(|e| ConnectError::Refused(e.to_string()))
        };
        let headers = request.headers_mut();
        match &self.auth {
            UpstreamAuth::Bearer(key) => {
                headers.insert("Authorization", header(&format!("Bearer {key}"))?);
                headers.insert("OpenAI-Beta", header("realtime=v1")?);
            }
            UpstreamAuth::ApiKey(key) => {
                headers.insert("api-key", header(key)?);
            }
            UpstreamAuth::None => {}
        }
        Ok(request)
    }
}

/// Opens upstream connections through the upstream circuit breaker and the
/// retry policy.
pub struct UpstreamConnector {
    endpoint: UpstreamEndpoint,
    connect_timeout: Duration,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<Metrics>,
}

impl UpstreamConnector {
    pub fn new(
        endpoint: UpstreamEndpoint,
        connect_timeout: Duration,
        retry: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            endpoint,
            connect_timeout,
            retry,
            breaker,
            metrics,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[instrument(name = "upstream_connect", skip(self))]
    pub async fn connect(&self, namespace: &str) -> Result<UpstreamStream, BridgeError> {
        let stream = self
            .breaker
            .guard(|| self.retry.execute(|| self.connect_once()))
            .await?;
        info!("Connected to upstream realtime endpoint");
        Ok(stream)
    }

    async fn connect_once(&self) -> Result<UpstreamStream, ConnectError> {
        let request = self.endpoint.request()?;
        let started = Instant::now();
        let result = match tokio::time::timeout(self.connect_timeout, connect_async(request)).await
        {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(ConnectError::Refused(e.to_string())),
            Err(_) => Err(ConnectError::Timeout(self.connect_timeout)),
        };
        match &result {
            Ok(_) => {
                self.metrics.increment("upstream_connections");
                self.metrics
                    .record_latency("upstream_connect", started.elapsed());
            }
            Err(e) => {
                warn!(error = %e, "Upstream connect attempt failed");
                self.metrics.record_error(e.metric());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream_config(provider: Provider) -> UpstreamConfig {
        UpstreamConfig {
            provider,
            openai_api_key: Some("sk-test".into()),
            openai_model: "gpt-4o-realtime-preview".into(),
            azure_resource: Some("contoso".into()),
            azure_deployment: Some("realtime".into()),
            azure_api_key: Some("azure-key".into()),
            url_override: None,
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
            voice: "alloy".into(),
        }
    }

    #[test]
    fn test_openai_endpoint() {
        let endpoint = UpstreamEndpoint::from_config(&upstream_config(Provider::OpenAI));
        assert_eq!(
            endpoint.url,
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );

        let request = endpoint.request().unwrap();
        assert_eq!(request.headers()["Authorization"], "Bearer sk-test");
        assert_eq!(request.headers()["OpenAI-Beta"], "realtime=v1");
    }

    #[test]
    fn test_azure_endpoint() {
        let endpoint = UpstreamEndpoint::from_config(&upstream_config(Provider::Azure));
        assert_eq!(
            endpoint.url,
            "wss://contoso.openai.azure.com/openai/realtime?api-version=2024-10-01-preview&deployment=realtime"
        );

        let request = endpoint.request().unwrap();
        assert_eq!(request.headers()["api-key"], "azure-key");
        assert!(request.headers().get("Authorization").is_none());
    }

    #[test]
    fn test_url_override_keeps_provider_auth() {
        let mut config = upstream_config(Provider::Azure);
        config.url_override = Some("ws://127.0.0.1:9001".into());
        let endpoint = UpstreamEndpoint::from_config(&config);

        assert_eq!(endpoint.url, "ws://127.0.0.1:9001");
        assert_eq!(endpoint.auth, UpstreamAuth::ApiKey("azure-key".into()));
    }

    #[test]
    fn test_invalid_url_is_refused() {
        let endpoint = UpstreamEndpoint {
            url: "not a url".into(),
            auth: UpstreamAuth::None,
        };
        assert!(matches!(endpoint.request(), Err(ConnectError::Refused(_))));
    }

    #[tokio::test]
    async fn test_connect_counts_every_failed_attempt() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let metrics = Arc::new(Metrics::new());
        let breaker = Arc::new(CircuitBreaker::new("upstream", Default::default()));
        let connector = UpstreamConnector::new(
            UpstreamEndpoint {
                url: format!("ws://{addr}"),
                auth: UpstreamAuth::None,
            },
            Duration::from_secs(5),
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2)),
            breaker.clone(),
            metrics.clone(),
        );

        let err = connector.connect("acme").await.unwrap_err();

        assert!(matches!(err, BridgeError::RetryExhausted { attempts: 3, .. }));
        assert_eq!(metrics.error_count("upstream_connection_failed"), 3);
        assert_eq!(metrics.counter("upstream_connections"), 0);
        assert_eq!(breaker.snapshot().failure_count, 1);
    }
}
