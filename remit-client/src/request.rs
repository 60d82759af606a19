//! Single API call and its retry loop.

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::future::Future;
use std::io::{Cursor, Read, Seek};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::{
    ApiError, Attempt, Authorizer, ErrorCode, ReplayableBody, RequestFailure, Result, Retryer,
    UnmarshalerRegistry,
};

/// Response header carrying the service's request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Default)]
struct StateInner {
    retry_count: u32,
    status: Option<StatusCode>,
    error: Option<ErrorCode>,
    finished: bool,
}

/// Progress of a request, observable while it is being sent.
#[derive(Debug, Clone, Default)]
pub struct RequestState {
    inner: Arc<Mutex<StateInner>>,
}

impl RequestState {
    /// Retries executed so far.
    pub fn retry_count(&self) -> u32 {
        self.inner.lock().retry_count
    }

    /// Status of the most recent response.
    pub fn status(&self) -> Option<StatusCode> {
        self.inner.lock().status
    }

    /// Code of the terminal error, once the request failed.
    pub fn error(&self) -> Option<ErrorCode> {
        self.inner.lock().error
    }

    /// Whether the request has completed, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    fn record_status(&self, status: StatusCode) {
        self.inner.lock().status = Some(status);
    }

    fn record_retry(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.retry_count += 1;
        inner.retry_count
    }

    fn finish(&self, error: Option<ErrorCode>) {
        let mut inner = self.inner.lock();
        inner.error = error;
        inner.finished = true;
    }
}

/// One API call.
///
/// Made by [`Client::new_request`](crate::Client::new_request). Sending
/// consumes the request, so it runs its retry loop exactly once.
pub struct Request {
    http: reqwest::Request,
    transport: reqwest::Client,
    retryer: Arc<dyn Retryer>,
    authorizer: Option<Arc<dyn Authorizer>>,
    unmarshalers: Arc<UnmarshalerRegistry>,
    body: Option<ReplayableBody>,
    state: RequestState,
    cancel: Option<CancellationToken>,
}

impl Request {
    pub(crate) fn new(
        http: reqwest::Request,
        transport: reqwest::Client,
        retryer: Arc<dyn Retryer>,
        authorizer: Option<Arc<dyn Authorizer>>,
        unmarshalers: Arc<UnmarshalerRegistry>,
    ) -> Self {
        Self {
            http,
            transport,
            retryer,
            authorizer,
            unmarshalers,
            body: None,
            state: RequestState::default(),
            cancel: None,
        }
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        self.http.method()
    }

    /// Full URL including query parameters.
    pub fn url(&self) -> &Url {
        self.http.url()
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        self.http.headers()
    }

    /// Mutable request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.http.headers_mut()
    }

    /// Handle for observing this request while it is sent.
    pub fn state(&self) -> RequestState {
        self.state.clone()
    }

    /// Retries executed so far.
    pub fn retry_count(&self) -> u32 {
        self.state.retry_count()
    }

    /// Set a header, replacing any default value for the same name.
    ///
    /// Invalid names or values are skipped.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.http.headers_mut().insert(name, value);
            }
            _ => {
                tracing::warn!(header = name.as_ref(), "Skipping invalid request header");
            }
        }
        self
    }

    /// Add query parameters, encoded in key order.
    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let params: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if !params.is_empty() {
            self.http.url_mut().query_pairs_mut().extend_pairs(&params);
        }
        self
    }

    /// Send `body` with every attempt, replayed from its start each time.
    pub fn body<R>(mut self, body: R) -> Self
    where
        R: Read + Seek + Send + 'static,
    {
        self.body = Some(ReplayableBody::new(Box::new(body)));
        self
    }

    /// Send `value` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, ApiError> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            ApiError::with_source(ErrorCode::Unknown, "failed to serialize request body", e)
        })?;
        let mut request = self.body(Cursor::new(bytes));
        request
            .http
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(request)
    }

    /// Override the client's retry policy for this request.
    pub fn retryer(mut self, retryer: Arc<dyn Retryer>) -> Self {
        self.retryer = retryer;
        self
    }

    /// Override the client's authorizer for this request.
    pub fn authorizer(mut self, authorizer: Option<Arc<dyn Authorizer>>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Abort the request when `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Send the request and decode the response body into `T`.
    ///
    /// The decoder is picked by the request's `Accept` header, falling back
    /// to JSON.
    pub async fn send<T: DeserializeOwned>(self) -> Result<T> {
        let result = self.send_and_decode().await;
        self.state.finish(result.as_ref().err().map(RequestFailure::code));
        result
    }

    /// Send the request without decoding the response body.
    pub async fn send_empty(self) -> Result<()> {
        let result = self.execute().await.map(drop);
        self.state.finish(result.as_ref().err().map(RequestFailure::code));
        result
    }

    async fn send_and_decode<T: DeserializeOwned>(&self) -> Result<T> {
        let response = self.execute().await?;
        let status = response.status().as_u16();
        let request_id = request_id_of(response.headers());

        let body: Bytes = match self.cancellable(response.bytes()).await {
            Some(Ok(body)) => body,
            Some(Err(e)) => {
                return Err(self.failure(
                    ApiError::with_source(ErrorCode::UnmarshalFailed, "unmarshal failed", e),
                    status,
                    request_id,
                ));
            }
            None => return Err(self.cancelled(status, request_id)),
        };

        let accept = self
            .http
            .headers()
            .get(ACCEPT)
            .and_then(|value| value.to_str().ok());
        self.unmarshalers.decode(accept, &body).map_err(|e| {
            self.failure(
                ApiError::with_source(ErrorCode::UnmarshalFailed, "unmarshal failed", e),
                status,
                request_id,
            )
        })
    }

    /// Run the retry loop until a 2xx response or a terminal failure.
    ///
    /// `attempt` counts retries already executed, so a failure message of
    /// "after 0 attempts" means one HTTP call was made and not retried.
    /// The retryer decides on the count so far and computes the delay from
    /// the incremented count.
    async fn execute(&self) -> Result<reqwest::Response> {
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Err(self.cancelled(0, String::new()));
            }

            let request = self.prepare_attempt()?;
            trace!(attempt, method = %request.method(), url = %request.url(), "Sending request");

            let outcome = match self.cancellable(self.transport.execute(request)).await {
                Some(outcome) => outcome,
                None => return Err(self.cancelled(0, String::new())),
            };

            let delay = match outcome {
                Err(e) => {
                    let timed_out = e.is_timeout();
                    let check = Attempt::transport_failure(self.retry_count(), timed_out);
                    if !self.may_retry(&check, attempt) {
                        let code = if timed_out {
                            ErrorCode::Timeout
                        } else {
                            ErrorCode::Unknown
                        };
                        return Err(self.failure(
                            ApiError::with_source(code, failed_after(attempt), e),
                            0,
                            String::new(),
                        ));
                    }
                    let retry_count = self.state.record_retry();
                    let delay = self
                        .retryer
                        .retry_delay(&Attempt::transport_failure(retry_count, timed_out));
                    debug!(
                        attempt = attempt + 1,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying request due to error"
                    );
                    delay
                }
                Ok(response) => {
                    let status = response.status();
                    self.state.record_status(status);

                    if is_success(status) {
                        return Ok(response);
                    }

                    let request_id = request_id_of(response.headers());
                    if status == StatusCode::NOT_FOUND {
                        return Err(self.failure(
                            ApiError::new(ErrorCode::NotFound, failed_after(attempt)),
                            status.as_u16(),
                            request_id,
                        ));
                    }

                    let check = Attempt::response(self.retry_count(), status, response.headers());
                    if !self.may_retry(&check, attempt) {
                        return Err(self.failure(
                            ApiError::new(ErrorCode::Unknown, failed_after(attempt)),
                            status.as_u16(),
                            request_id,
                        ));
                    }
                    let retry_count = self.state.record_retry();
                    let delay = self.retryer.retry_delay(&Attempt::response(
                        retry_count,
                        status,
                        response.headers(),
                    ));
                    debug!(
                        attempt = attempt + 1,
                        status = %status,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying request due to status code"
                    );
                    delay
                }
            };

            if !self.pause(delay).await {
                return Err(self.cancelled(0, String::new()));
            }
            attempt += 1;
        }
    }

    /// Build the request for one attempt: fresh body view, then credentials.
    fn prepare_attempt(&self) -> Result<reqwest::Request> {
        let mut request = reqwest::Request::new(self.http.method().clone(), self.http.url().clone());
        *request.headers_mut() = self.http.headers().clone();
        *request.timeout_mut() = self.http.timeout().copied();

        if let Some(body) = &self.body {
            let view = body.replay();
            let bytes = view.read_remaining().map_err(|e| {
                self.failure(
                    ApiError::with_source(ErrorCode::Unknown, "failed to read request body", e),
                    0,
                    String::new(),
                )
            })?;
            view.close();
            *request.body_mut() = Some(bytes.into());
        }

        if let Some(authorizer) = &self.authorizer {
            authorizer
                .authorize(&mut request)
                .map_err(|e| self.failure(e, 0, String::new()))?;
        }

        Ok(request)
    }

    fn may_retry(&self, check: &Attempt<'_>, attempt: u32) -> bool {
        self.retryer.should_retry(check) && attempt < self.retryer.max_retries()
    }

    /// Sleep before the next attempt. Returns false when cancelled.
    async fn pause(&self, delay: Duration) -> bool {
        self.cancellable(tokio::time::sleep(delay)).await.is_some()
    }

    /// Drive `fut` unless the request is cancelled first.
    async fn cancellable<F: Future>(&self, fut: F) -> Option<F::Output> {
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => None,
                output = fut => Some(output),
            },
            None => Some(fut.await),
        }
    }

    fn failure(&self, error: ApiError, status: u16, request_id: impl Into<String>) -> RequestFailure {
        RequestFailure::new(error, status, request_id).with_retries(self.retry_count())
    }

    fn cancelled(&self, status: u16, request_id: impl Into<String>) -> RequestFailure {
        let message = format!("http request cancelled after {} attempts", self.retry_count());
        self.failure(ApiError::new(ErrorCode::Unknown, message), status, request_id)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", self.http.method())
            .field("url", &self.http.url().as_str())
            .field("retryer", &self.retryer)
            .field("authorizer", &self.authorizer)
            .field("body", &self.body)
            .field("state", &self.state)
            .finish()
    }
}

/// 200 OK through 226 IM Used.
fn is_success(status: StatusCode) -> bool {
    (StatusCode::OK..=StatusCode::IM_USED).contains(&status)
}

fn failed_after(attempt: u32) -> String {
    format!("http request failed after {attempt} attempts")
}

fn request_id_of(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Client, ClientConfig, Operation};

    fn request() -> Request {
        Client::new(ClientConfig::builder().base_url("http://127.0.0.1:9").build())
            .unwrap()
            .new_request(&Operation::post("/v1/transfers"))
            .unwrap()
    }

    #[test]
    fn test_success_range() {
        assert!(is_success(StatusCode::OK));
        assert!(is_success(StatusCode::NO_CONTENT));
        assert!(is_success(StatusCode::IM_USED));
        assert!(!is_success(StatusCode::from_u16(227).unwrap()));
        assert!(!is_success(StatusCode::CONTINUE));
        assert!(!is_success(StatusCode::MULTIPLE_CHOICES));
    }

    #[test]
    fn test_request_id_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id_of(&headers), "");
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("abc-123"));
        assert_eq!(request_id_of(&headers), "abc-123");
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let request = request().json(&serde_json::json!({"amount": "10.00"})).unwrap();
        assert_eq!(request.headers().get(CONTENT_TYPE).unwrap(), "application/json");
        assert!(request.body.is_some());
    }

    #[test]
    fn test_prepare_attempt_replays_body() {
        let request = request().body(Cursor::new(b"{\"a\":1}".to_vec()));

        for _ in 0..3 {
            let attempt = request.prepare_attempt().unwrap();
            assert_eq!(attempt.body().and_then(|b| b.as_bytes()), Some(&b"{\"a\":1}"[..]));
            assert_eq!(attempt.url(), request.url());
        }
    }

    #[test]
    fn test_prepare_attempt_signs_each_time() {
        let signer = crate::SignatureAuthorizer::new("client", "secret");
        let request = request()
            .body(Cursor::new(b"payload".to_vec()))
            .authorizer(Some(Arc::new(signer.clone())));

        let first = request.prepare_attempt().unwrap();
        let second = request.prepare_attempt().unwrap();
        let expected = signer.sign(b"payload").unwrap();
        assert_eq!(first.headers().get("signature").unwrap(), expected.as_str());
        assert_eq!(second.headers().get("signature").unwrap(), expected.as_str());
    }

    #[test]
    fn test_invalid_header_skipped() {
        let request = request().header("bad header", "x").header("X-Ok", "yes");
        assert!(request.headers().get("bad header").is_none());
        assert_eq!(request.headers().get("x-ok").unwrap(), "yes");
    }

    #[test]
    fn test_state_starts_empty() {
        let request = request();
        let state = request.state();
        assert_eq!(state.retry_count(), 0);
        assert_eq!(state.status(), None);
        assert_eq!(state.error(), None);
        assert!(!state.is_finished());
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let token = CancellationToken::new();
        token.cancel();
        let request = request().cancel_on(token);
        let state = request.state();

        let err = request.send_empty().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert_eq!(err.message(), "http request cancelled after 0 attempts");
        assert!(state.is_finished());
        assert_eq!(state.error(), Some(ErrorCode::Unknown));
    }
}
