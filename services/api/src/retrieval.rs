//! HTTP client for the knowledge-base search service.

use crate::config::RetrievalConfig;
use async_trait::async_trait;
use kbvoice_core::resilience::{CircuitBreaker, RetryPolicy};
use kbvoice_core::{Retrieval, RetrievalError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Serialize, Debug)]
struct SearchRequest<'a> {
    query: &'a str,
    namespace: &'a str,
    top_k: usize,
}

#[derive(Deserialize, Debug, Default)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize, Debug)]
struct SearchHit {
    #[serde(default)]
    content: String,
}

/// Posts `{query, namespace, top_k}` to the search service and joins the
/// returned chunks with blank lines.
pub struct HttpRetrieval {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    top_k: usize,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl HttpRetrieval {
    pub fn new(
        config: &RetrievalConfig,
        retry: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            top_k: config.top_k,
            retry,
            breaker,
        })
    }

    async fn search_once(
        &self,
        query: &str,
        namespace: &str,
    ) -> Result<Option<String>, RetrievalError> {
        let mut request = self.client.post(&self.url).json(&SearchRequest {
            query,
            namespace,
            top_k: self.top_k,
        });
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RetrievalError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Status(status.as_u16()));
        }
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Request(e.to_string()))?;

        let chunks: Vec<&str> = body
            .results
            .iter()
            .map(|hit| hit.content.trim())
            .filter(|content| !content.is_empty())
            .collect();
        if chunks.is_empty() {
            info!(namespace, "No results found");
            return Ok(None);
        }
        info!(namespace, chunks = chunks.len(), "Found results");
        Ok(Some(chunks.join("\n\n")))
    }
}

#[async_trait]
impl Retrieval for HttpRetrieval {
    async fn search(&self, query: &str, namespace: &str) -> Result<Option<String>, RetrievalError> {
        if query.trim().is_empty() || namespace.trim().is_empty() {
            debug!("Blank query or namespace, skipping search");
            return Ok(None);
        }
        let result = self
            .breaker
            .guard(|| self.retry.execute(|| self.search_once(query, namespace)))
            .await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbvoice_core::resilience::CircuitBreakerConfig;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, max_attempts: u32, breaker: Arc<CircuitBreaker>) -> HttpRetrieval {
        let config = RetrievalConfig {
            url: format!("{}/search", server.uri()),
            api_key: Some("secret".into()),
            top_k: 5,
            timeout: Duration::from_secs(5),
        };
        let retry = RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(2));
        HttpRetrieval::new(&config, retry, breaker).unwrap()
    }

    fn breaker(threshold: u32) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "retrieval",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_duration: Duration::from_secs(30),
                half_open_success_target: 3,
            },
        ))
    }

    #[tokio::test]
    async fn test_search_joins_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("api-key", "secret"))
            .and(body_json(json!({"query": "pricing", "namespace": "acme", "top_k": 5})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"content": "Plan A"}, {"content": "  "}, {"content": "Plan B"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let retrieval = client(&server, 3, breaker(3));
        let result = retrieval.search("pricing", "acme").await.unwrap();

        assert_eq!(result.as_deref(), Some("Plan A\n\nPlan B"));
    }

    #[tokio::test]
    async fn test_empty_results_are_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .mount(&server)
            .await;

        let retrieval = client(&server, 3, breaker(3));
        assert_eq!(retrieval.search("pricing", "acme").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blank_query_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let retrieval = client(&server, 3, breaker(3));
        assert_eq!(retrieval.search("   ", "acme").await.unwrap(), None);
        assert_eq!(retrieval.search("pricing", "").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let retrieval = client(&server, 2, breaker(3));
        let err = retrieval.search("pricing", "acme").await.unwrap_err();

        assert_eq!(
            err,
            RetrievalError::Exhausted {
                attempts: 2,
                message: "retrieval service returned status 503".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let retrieval = client(&server, 1, breaker(1));
        assert!(matches!(
            retrieval.search("pricing", "acme").await,
            Err(RetrievalError::Exhausted { attempts: 1, .. })
        ));
        assert_eq!(
            retrieval.search("pricing", "acme").await,
            Err(RetrievalError::CircuitOpen)
        );
    }
}
