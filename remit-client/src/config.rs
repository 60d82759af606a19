//! Client configuration.
//!
//! [`ClientConfig`] holds optional values. [`ClientConfig::sanitize`] merges
//! them with the defaults into a [`ResolvedConfig`] without touching the
//! caller's value.

use crate::auth::{Authorizer, BearerTokenAuthorizer, SignatureAuthorizer};
use crate::error::{ApiError, ErrorCode};
use crate::retry::{DefaultRetryer, Retryer};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Retries allowed by the default retryer.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default overall timeout of one attempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connect and TLS handshake timeout.
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default cap on idle pooled connections.
pub const DEFAULT_MAX_IDLE_CONNS: usize = 100;
/// Default cap on idle pooled connections per host.
pub const DEFAULT_MAX_IDLE_CONNS_PER_HOST: usize = 2;
/// Default lifetime of an idle pooled connection.
pub const DEFAULT_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);

/// Client configuration. Unset values fall back to the defaults above.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Base URL every operation path is joined onto.
    pub base_url: String,
    /// Retry policy.
    pub retryer: Option<Arc<dyn Retryer>>,
    /// Credentials.
    pub authorizer: Option<Arc<dyn Authorizer>>,
    /// Overall timeout of one attempt.
    pub request_timeout: Option<Duration>,
    /// Connect and TLS handshake timeout.
    pub tls_handshake_timeout: Option<Duration>,
    /// Maximum idle connections.
    pub max_idle_conns: Option<usize>,
    /// Maximum idle connections per host.
    pub max_idle_conns_per_host: Option<usize>,
    /// How long an idle connection is kept.
    pub idle_conn_timeout: Option<Duration>,
    /// Headers sent with every request unless the request overrides them.
    pub default_headers: Vec<(String, String)>,
    /// User agent string.
    pub user_agent: Option<String>,
}

/// Fully populated configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Base URL every operation path is joined onto.
    pub base_url: String,
    /// Retry policy.
    pub retryer: Arc<dyn Retryer>,
    /// Credentials.
    pub authorizer: Option<Arc<dyn Authorizer>>,
    /// Overall timeout of one attempt.
    pub request_timeout: Duration,
    /// Connect and TLS handshake timeout.
    pub tls_handshake_timeout: Duration,
    /// Maximum idle connections.
    pub max_idle_conns: usize,
    /// Maximum idle connections per host.
    pub max_idle_conns_per_host: usize,
    /// How long an idle connection is kept.
    pub idle_conn_timeout: Duration,
    /// Headers sent with every request unless the request overrides them.
    pub default_headers: Vec<(String, String)>,
    /// User agent string.
    pub user_agent: String,
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Merge with the defaults.
    pub fn sanitize(&self) -> ResolvedConfig {
        ResolvedConfig {
            base_url: self.base_url.clone(),
            retryer: self
                .retryer
                .clone()
                .unwrap_or_else(|| Arc::new(DefaultRetryer::new(DEFAULT_MAX_RETRIES))),
            authorizer: self.authorizer.clone(),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            tls_handshake_timeout: self
                .tls_handshake_timeout
                .unwrap_or(DEFAULT_TLS_HANDSHAKE_TIMEOUT),
            max_idle_conns: self.max_idle_conns.unwrap_or(DEFAULT_MAX_IDLE_CONNS),
            max_idle_conns_per_host: self
                .max_idle_conns_per_host
                .unwrap_or(DEFAULT_MAX_IDLE_CONNS_PER_HOST),
            idle_conn_timeout: self.idle_conn_timeout.unwrap_or(DEFAULT_IDLE_CONN_TIMEOUT),
            default_headers: self.default_headers.clone(),
            user_agent: self
                .user_agent
                .clone()
                .unwrap_or_else(|| format!("remit-client/{}", env!("CARGO_PKG_VERSION"))),
        }
    }

    /// Read the configuration from environment variables starting with `prefix`.
    ///
    /// See [`from_lookup`](Self::from_lookup) for the recognized keys.
    pub fn from_env(prefix: &str) -> Result<Self, ApiError> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`.
    ///
    /// Recognized keys, each prefixed with `prefix`: `BASE_URL`, `TOKEN`,
    /// `CLIENT_ID` and `SECRET_KEY`, `REQUEST_TIMEOUT_SECS`,
    /// `TLS_HANDSHAKE_TIMEOUT_SECS`, `MAX_IDLE_CONNS`,
    /// `MAX_IDLE_CONNS_PER_HOST`, `IDLE_CONN_TIMEOUT_SECS`. All are optional.
    /// A client id and secret key pair selects request signing, otherwise a
    /// token selects bearer authorization.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(format!("{prefix}{name}").as_str()).filter(|value| !value.trim().is_empty())
        };
        let parse = |name: &str| -> Result<Option<u64>, ApiError> { parse_var(prefix, name, get(name)) };

        let mut config = ClientConfig {
            base_url: get("BASE_URL").unwrap_or_default(),
            request_timeout: parse("REQUEST_TIMEOUT_SECS")?.map(Duration::from_secs),
            tls_handshake_timeout: parse("TLS_HANDSHAKE_TIMEOUT_SECS")?.map(Duration::from_secs),
            max_idle_conns: parse_var(prefix, "MAX_IDLE_CONNS", get("MAX_IDLE_CONNS"))?,
            max_idle_conns_per_host: parse_var(
                prefix,
                "MAX_IDLE_CONNS_PER_HOST",
                get("MAX_IDLE_CONNS_PER_HOST"),
            )?,
            idle_conn_timeout: parse("IDLE_CONN_TIMEOUT_SECS")?.map(Duration::from_secs),
            ..Default::default()
        };

        config.authorizer = match (get("CLIENT_ID"), get("SECRET_KEY"), get("TOKEN")) {
            (Some(client_id), Some(secret_key), _) => {
                Some(Arc::new(SignatureAuthorizer::new(client_id, secret_key)))
            }
            (_, _, Some(token)) => Some(Arc::new(BearerTokenAuthorizer::new(token))),
            _ => None,
        };

        Ok(config)
    }
}

fn parse_var<T>(prefix: &str, name: &str, value: Option<String>) -> Result<Option<T>, ApiError>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                ApiError::with_source(
                    ErrorCode::Unknown,
                    format!("invalid value for {prefix}{name}: {raw:?}"),
                    e,
                )
            })
        })
        .transpose()
}

/// Builder for client configuration.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Set the retry policy.
    pub fn retryer(mut self, retryer: impl Retryer + 'static) -> Self {
        self.config.retryer = Some(Arc::new(retryer));
        self
    }

    /// Set the authorizer.
    pub fn authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.config.authorizer = Some(Arc::new(authorizer));
        self
    }

    /// Set the overall timeout of one attempt.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Set the connect and TLS handshake timeout.
    pub fn tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.tls_handshake_timeout = Some(timeout);
        self
    }

    /// Set the maximum idle connections.
    pub fn max_idle_conns(mut self, max: usize) -> Self {
        self.config.max_idle_conns = Some(max);
        self
    }

    /// Set the maximum idle connections per host.
    pub fn max_idle_conns_per_host(mut self, max: usize) -> Self {
        self.config.max_idle_conns_per_host = Some(max);
        self
    }

    /// Set how long an idle connection is kept.
    pub fn idle_conn_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_conn_timeout = Some(timeout);
        self
    }

    /// Add a default header for all requests.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_sanitize_fills_defaults() {
        let config = ClientConfig {
            base_url: "https://api.example.com".to_string(),
            ..Default::default()
        };
        let resolved = config.sanitize();

        assert_eq!(resolved.base_url, "https://api.example.com");
        assert_eq!(resolved.request_timeout, Duration::from_secs(30));
        assert_eq!(resolved.tls_handshake_timeout, Duration::from_secs(10));
        assert_eq!(resolved.max_idle_conns, 100);
        assert_eq!(resolved.max_idle_conns_per_host, 2);
        assert_eq!(resolved.idle_conn_timeout, Duration::from_secs(90));
        assert_eq!(resolved.retryer.max_retries(), 3);
        assert!(resolved.authorizer.is_none());
        assert!(resolved.user_agent.starts_with("remit-client/"));
    }

    #[test]
    fn test_sanitize_keeps_overrides_and_input() {
        let config = ClientConfig::builder()
            .base_url("https://api.example.com")
            .request_timeout(Duration::from_secs(5))
            .max_idle_conns_per_host(8)
            .retryer(DefaultRetryer::new(1))
            .build();
        let resolved = config.sanitize();

        assert_eq!(resolved.request_timeout, Duration::from_secs(5));
        assert_eq!(resolved.max_idle_conns_per_host, 8);
        assert_eq!(resolved.max_idle_conns, 100);
        assert_eq!(resolved.retryer.max_retries(), 1);

        // The caller's configuration is left as it was.
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.tls_handshake_timeout, None);
        assert_eq!(config.max_idle_conns, None);
    }

    #[test]
    fn test_builder_default_headers() {
        let config = ClientConfig::builder()
            .default_header("Accept", "application/json")
            .user_agent("my-app/1.0")
            .build();
        assert_eq!(
            config.default_headers,
            vec![("Accept".to_string(), "application/json".to_string())]
        );
        assert_eq!(config.sanitize().user_agent, "my-app/1.0");
    }

    #[test]
    fn test_from_lookup_reads_values() {
        let config = ClientConfig::from_lookup(
            "REMIT_",
            lookup(&[
                ("REMIT_BASE_URL", "https://sandbox.example.com"),
                ("REMIT_REQUEST_TIMEOUT_SECS", "12"),
                ("REMIT_MAX_IDLE_CONNS", "10"),
                ("REMIT_MAX_IDLE_CONNS_PER_HOST", " 4 "),
                ("REMIT_IDLE_CONN_TIMEOUT_SECS", "60"),
                ("REMIT_TOKEN", "tok"),
            ]),
        )
        .unwrap();

        assert_eq!(config.base_url, "https://sandbox.example.com");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(12)));
        assert_eq!(config.tls_handshake_timeout, None);
        assert_eq!(config.max_idle_conns, Some(10));
        assert_eq!(config.max_idle_conns_per_host, Some(4));
        assert_eq!(config.idle_conn_timeout, Some(Duration::from_secs(60)));
        assert!(format!("{:?}", config.authorizer).contains("BearerTokenAuthorizer"));
    }

    #[test]
    fn test_from_lookup_prefers_signing() {
        let config = ClientConfig::from_lookup(
            "REMIT_",
            lookup(&[
                ("REMIT_CLIENT_ID", "client"),
                ("REMIT_SECRET_KEY", "secret"),
                ("REMIT_TOKEN", "tok"),
            ]),
        )
        .unwrap();
        assert!(format!("{:?}", config.authorizer).contains("SignatureAuthorizer"));
    }

    #[test]
    fn test_from_lookup_empty() {
        let config = ClientConfig::from_lookup("REMIT_", lookup(&[("REMIT_TOKEN", "  ")])).unwrap();
        assert!(config.base_url.is_empty());
        assert!(config.authorizer.is_none());
        assert!(config.request_timeout.is_none());
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = ClientConfig::from_lookup("REMIT_", lookup(&[("REMIT_MAX_IDLE_CONNS", "lots")]))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert!(err.message().contains("REMIT_MAX_IDLE_CONNS"));
    }
}
