use kbvoice_core::resilience::RetryPolicy;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Supported upstream realtime providers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Azure,
}

/// Where and how to reach the upstream realtime endpoint.
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub azure_resource: Option<String>,
    pub azure_deployment: Option<String>,
    pub azure_api_key: Option<String>,
    /// Replaces the provider URL when set.
    pub url_override: Option<String>,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub voice: String,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub top_k: usize,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub default_kb_id: String,
    pub client_init_timeout: Duration,
    pub max_upstream_reconnects: u32,
}

#[derive(Clone, Debug)]
pub struct ResilienceConfig {
    pub max_retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub upstream_failure_threshold: u32,
    pub upstream_open_duration: Duration,
    pub retrieval_failure_threshold: u32,
    pub retrieval_open_duration: Duration,
    pub half_open_successes: u32,
}

impl ResilienceConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retry_attempts,
            self.retry_base_delay,
            self.retry_max_delay,
        )
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub environment: String,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    pub conversations_dir: PathBuf,
    pub upstream: UpstreamConfig,
    pub retrieval: RetrievalConfig,
    pub session: SessionConfig,
    pub resilience: ResilienceConfig,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Reads a duration given in (possibly fractional) seconds.
fn seconds_or(name: &str, default: f64) -> Result<Duration, ConfigError> {
    let secs = parse_or::<f64>(name, default)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:8003");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let provider = match var_or("REALTIME_PROVIDER", "openai").to_lowercase().as_str() {
            "azure" => Provider::Azure,
            "openai" => Provider::OpenAI,
            other => {
                return Err(ConfigError::InvalidValue(
                    "REALTIME_PROVIDER".to_string(),
                    format!("'{}' is not one of openai, azure", other),
                ));
            }
        };

        let upstream = UpstreamConfig {
            provider,
            openai_api_key: optional("OPENAI_API_KEY"),
            openai_model: var_or("OPENAI_REALTIME_MODEL", "gpt-4o-realtime-preview"),
            azure_resource: optional("AZURE_RESOURCE"),
            azure_deployment: optional("AZURE_OPENAI_DEPLOYMENT_NAME"),
            azure_api_key: optional("AZURE_OPENAI_API_KEY"),
            url_override: optional("UPSTREAM_URL"),
            connect_timeout: seconds_or("UPSTREAM_CONNECTION_TIMEOUT", 10.0)?,
            send_timeout: seconds_or("UPSTREAM_SEND_TIMEOUT", 5.0)?,
            voice: var_or("VOICE", "alloy"),
        };

        match upstream.provider {
            Provider::OpenAI => {
                if upstream.openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
            }
            Provider::Azure => {
                if upstream.azure_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "AZURE_OPENAI_API_KEY must be set for 'azure' provider".to_string(),
                    ));
                }
                if upstream.url_override.is_none()
                    && (upstream.azure_resource.is_none() || upstream.azure_deployment.is_none())
                {
                    return Err(ConfigError::MissingVar(
                        "AZURE_RESOURCE and AZURE_OPENAI_DEPLOYMENT_NAME must be set for 'azure' provider"
                            .to_string(),
                    ));
                }
            }
        }

        let retrieval = RetrievalConfig {
            url: optional("RETRIEVAL_URL")
                .ok_or_else(|| ConfigError::MissingVar("RETRIEVAL_URL".to_string()))?,
            api_key: optional("RETRIEVAL_API_KEY"),
            top_k: parse_or("RETRIEVAL_TOP_K", 5)?,
            timeout: seconds_or("RETRIEVAL_TIMEOUT", 10.0)?,
        };

        let default_kb_id = var_or("DEFAULT_KB_ID", "default").trim().to_string();
        if default_kb_id.is_empty() {
            return Err(ConfigError::InvalidValue(
                "DEFAULT_KB_ID".to_string(),
                "must not be blank".to_string(),
            ));
        }
        let session = SessionConfig {
            default_kb_id,
            client_init_timeout: seconds_or("CLIENT_INIT_TIMEOUT", 30.0)?,
            max_upstream_reconnects: parse_or("MAX_UPSTREAM_RECONNECTS", 1)?,
        };

        let resilience = ResilienceConfig {
            max_retry_attempts: parse_or("MAX_RETRY_ATTEMPTS", 3)?,
            retry_base_delay: seconds_or("RETRY_BASE_DELAY", 1.0)?,
            retry_max_delay: seconds_or("RETRY_MAX_DELAY", 10.0)?,
            upstream_failure_threshold: parse_or("UPSTREAM_CIRCUIT_FAILURE_THRESHOLD", 5)?,
            upstream_open_duration: seconds_or("UPSTREAM_CIRCUIT_TIMEOUT", 60.0)?,
            retrieval_failure_threshold: parse_or("RETRIEVAL_CIRCUIT_FAILURE_THRESHOLD", 3)?,
            retrieval_open_duration: seconds_or("RETRIEVAL_CIRCUIT_TIMEOUT", 30.0)?,
            half_open_successes: parse_or("CIRCUIT_HALF_OPEN_SUCCESSES", 3)?,
        };

        Ok(Self {
            bind_address,
            environment: var_or("ENVIRONMENT", "dev"),
            log_level,
            prompts_path: PathBuf::from(var_or("PROMPTS_PATH", "./prompts")),
            conversations_dir: PathBuf::from(var_or("CONVERSATIONS_DIR", "conversations")),
            upstream,
            retrieval,
            session,
            resilience,
        })
    }
}
