//! API client.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::{
    ApiError, Authorizer, ClientConfig, ErrorCode, Request, ResolvedConfig, Retryer, Unmarshaler,
    UnmarshalerRegistry,
};

/// A single API operation: HTTP method and path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    method: Method,
    path: String,
}

impl Operation {
    /// Create an operation.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    /// A GET operation.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// A POST operation.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// A PUT operation.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// A PATCH operation.
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// A DELETE operation.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path relative to the client's base URL.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Holds the shared transport and default policies, and makes requests.
///
/// Cloning is cheap: clones share the connection pool and the decoder
/// registry.
#[derive(Debug, Clone)]
pub struct Client {
    inner: reqwest::Client,
    base_url: Url,
    default_headers: HeaderMap,
    retryer: Arc<dyn Retryer>,
    authorizer: Option<Arc<dyn Authorizer>>,
    unmarshalers: Arc<UnmarshalerRegistry>,
    config: Arc<ResolvedConfig>,
}

impl Client {
    /// Create a client. Unset configuration values take their defaults.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let config = config.sanitize();

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            ApiError::with_source(ErrorCode::Unknown, "invalid endpoint supplied", e)
        })?;

        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = HeaderName::try_from(name.as_str()).map_err(|e| {
                ApiError::with_source(ErrorCode::Unknown, format!("invalid header name {name:?}"), e)
            })?;
            let value = HeaderValue::try_from(value.as_str()).map_err(|e| {
                ApiError::with_source(ErrorCode::Unknown, format!("invalid value for header {name}"), e)
            })?;
            default_headers.insert(name, value);
        }

        // The pool only knows a per-host limit; it may not exceed the global one.
        let max_idle_per_host = config.max_idle_conns_per_host.min(config.max_idle_conns);

        let inner = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.tls_handshake_timeout)
            .pool_idle_timeout(config.idle_conn_timeout)
            .pool_max_idle_per_host(max_idle_per_host)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ApiError::with_source(ErrorCode::Unknown, "failed to build http transport", e))?;

        debug!(
            base_url = %base_url,
            request_timeout_ms = config.request_timeout.as_millis() as u64,
            max_idle_per_host,
            "Created API client"
        );

        Ok(Self {
            inner,
            base_url,
            default_headers,
            retryer: Arc::clone(&config.retryer),
            authorizer: config.authorizer.clone(),
            unmarshalers: Arc::new(UnmarshalerRegistry::new()),
            config: Arc::new(config),
        })
    }

    /// The sanitized configuration in effect, including policies swapped in
    /// after construction.
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Base URL operations are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Current default retry policy.
    pub fn retryer(&self) -> &Arc<dyn Retryer> {
        &self.retryer
    }

    /// Replace the default retry policy for requests made from now on.
    pub fn set_retryer(&mut self, retryer: impl Retryer + 'static) {
        let retryer: Arc<dyn Retryer> = Arc::new(retryer);
        Arc::make_mut(&mut self.config).retryer = Arc::clone(&retryer);
        self.retryer = retryer;
    }

    /// Current default authorizer.
    pub fn authorizer(&self) -> Option<&Arc<dyn Authorizer>> {
        self.authorizer.as_ref()
    }

    /// Replace the default authorizer for requests made from now on.
    pub fn set_authorizer(&mut self, authorizer: impl Authorizer + 'static) {
        let authorizer: Arc<dyn Authorizer> = Arc::new(authorizer);
        Arc::make_mut(&mut self.config).authorizer = Some(Arc::clone(&authorizer));
        self.authorizer = Some(authorizer);
    }

    /// Remove the default authorizer.
    pub fn clear_authorizer(&mut self) {
        Arc::make_mut(&mut self.config).authorizer = None;
        self.authorizer = None;
    }

    /// Decoders used for response bodies.
    pub fn unmarshalers(&self) -> &UnmarshalerRegistry {
        &self.unmarshalers
    }

    /// Register a decoder for a content type.
    ///
    /// Meant for startup. The registry is shared by every clone of this
    /// client.
    pub fn register_unmarshaler(
        &self,
        content_type: impl Into<String>,
        unmarshaler: impl Unmarshaler + 'static,
    ) {
        self.unmarshalers.register(content_type, unmarshaler);
    }

    /// Create a request for `op`.
    pub fn new_request(&self, op: &Operation) -> Result<Request, ApiError> {
        let url = join_url(&self.base_url, op.path())?;

        let mut http = reqwest::Request::new(op.method().clone(), url);
        *http.headers_mut() = self.default_headers.clone();

        Ok(Request::new(
            http,
            self.inner.clone(),
            Arc::clone(&self.retryer),
            self.authorizer.clone(),
            Arc::clone(&self.unmarshalers),
        ))
    }

    /// Create a request for `op` with query parameters.
    pub fn new_request_with_params<I, K, V>(&self, op: &Operation, params: I) -> Result<Request, ApiError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Ok(self.new_request(op)?.params(params))
    }
}

/// Join `path` onto the path of `base`, collapsing duplicate slashes.
fn join_url(base: &Url, path: &str) -> Result<Url, ApiError> {
    if base.cannot_be_a_base() {
        return Err(ApiError::new(
            ErrorCode::Unknown,
            format!("invalid endpoint supplied: {base} cannot be a base URL"),
        ));
    }

    let segments: Vec<&str> = base
        .path()
        .split('/')
        .chain(path.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect();

    let mut url = base.clone();
    url.set_path(&format!("/{}", segments.join("/")));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
