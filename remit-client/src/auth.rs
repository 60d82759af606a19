//! Request authorizers.

use crate::error::{ApiError, ErrorCode};
use base64::Engine;
use hmac::{Hmac, Mac};
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use reqwest::Request;
use sha2::Sha512;
use std::fmt;

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the client identifier of a signed request.
pub const CLIENT_ID_HEADER: &str = "client-id";

/// Header carrying the signature of a signed request.
pub const SIGNATURE_HEADER: &str = "signature";

/// Attaches credentials to an outgoing request.
///
/// Called once per attempt, after the body for that attempt is in place.
pub trait Authorizer: Send + Sync + fmt::Debug {
    /// Add credentials to `request`.
    fn authorize(&self, request: &mut Request) -> Result<(), ApiError>;
}

/// Sets `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct BearerTokenAuthorizer {
    token: String,
}

impl BearerTokenAuthorizer {
    /// Create a bearer authorizer. An empty token leaves requests untouched.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for BearerTokenAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerTokenAuthorizer")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Authorizer for BearerTokenAuthorizer {
    fn authorize(&self, request: &mut Request) -> Result<(), ApiError> {
        if self.token.is_empty() {
            return Ok(());
        }

        let mut value = HeaderValue::try_from(format!("Bearer {}", self.token)).map_err(|e| {
            ApiError::with_source(ErrorCode::Unknown, "invalid bearer token", e)
        })?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// Signs requests with HMAC-SHA512.
///
/// The digest covers the request body, or the URL path when the request has
/// no body, and is sent base64 encoded in the `signature` header next to the
/// `client-id` header.
#[derive(Clone)]
pub struct SignatureAuthorizer {
    client_id: String,
    secret_key: String,
}

impl SignatureAuthorizer {
    /// Create a signing authorizer.
    pub fn new(client_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Base64 HMAC-SHA512 of `message`.
    pub fn sign(&self, message: &[u8]) -> Result<String, ApiError> {
        let mut mac = HmacSha512::new_from_slice(self.secret_key.as_bytes()).map_err(|e| {
            ApiError::with_source(ErrorCode::Unknown, "invalid signing key", e.to_string())
        })?;
        mac.update(message);
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for SignatureAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureAuthorizer")
            .field("client_id", &self.client_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Authorizer for SignatureAuthorizer {
    fn authorize(&self, request: &mut Request) -> Result<(), ApiError> {
        // Bodies built by this crate are always buffered, so the bytes can be
        // read in place and the transport still sends them.
        let signature = match request.body() {
            Some(body) => match body.as_bytes() {
                Some(bytes) => self.sign(bytes)?,
                None => {
                    return Err(ApiError::new(
                        ErrorCode::Unknown,
                        "cannot sign a streaming request body",
                    ));
                }
            },
            None => self.sign(request.url().path().as_bytes())?,
        };

        let client_id = HeaderValue::try_from(self.client_id.as_str())
            .map_err(|e| ApiError::with_source(ErrorCode::Unknown, "invalid client id", e))?;
        let mut signature = HeaderValue::try_from(signature)
            .map_err(|e| ApiError::with_source(ErrorCode::Unknown, "invalid signature", e))?;
        signature.set_sensitive(true);

        let headers = request.headers_mut();
        headers.insert(HeaderName::from_static(CLIENT_ID_HEADER), client_id);
        headers.insert(HeaderName::from_static(SIGNATURE_HEADER), signature);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn request(url: &str) -> Request {
        Request::new(Method::GET, url.parse().unwrap())
    }

    #[test]
    fn test_bearer_sets_header() {
        let mut req = request("https://api.example.com/v1/users/me");
        BearerTokenAuthorizer::new("password").authorize(&mut req).unwrap();
        assert_eq!(req.headers().get(AUTHORIZATION).unwrap(), "Bearer password");
    }

    #[test]
    fn test_bearer_empty_token_is_noop() {
        let mut req = request("https://api.example.com/v1/users/me");
        BearerTokenAuthorizer::new("").authorize(&mut req).unwrap();
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_bearer_invalid_token() {
        let mut req = request("https://api.example.com/");
        let err = BearerTokenAuthorizer::new("bad\ntoken")
            .authorize(&mut req)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unknown);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let bearer = format!("{:?}", BearerTokenAuthorizer::new("hunter2"));
        assert!(!bearer.contains("hunter2"));

        let signer = format!("{:?}", SignatureAuthorizer::new("client", "hunter2"));
        assert!(signer.contains("client"));
        assert!(!signer.contains("hunter2"));
    }

    #[test]
    fn test_signature_over_path_without_body() {
        let signer = SignatureAuthorizer::new("client-1", "secret");
        let mut req = request("https://api.example.com/v1/users/me?page=2");
        signer.authorize(&mut req).unwrap();

        let expected = signer.sign(b"/v1/users/me").unwrap();
        assert_eq!(req.headers().get(CLIENT_ID_HEADER).unwrap(), "client-1");
        assert_eq!(req.headers().get(SIGNATURE_HEADER).unwrap(), expected.as_str());
    }

    #[test]
    fn test_signature_over_body_is_stable() {
        let signer = SignatureAuthorizer::new("client-1", "secret");
        let payload = br#"{"user_name":"sammy1"}"#;

        let mut first = request("https://api.example.com/v1/users/me");
        *first.body_mut() = Some(payload.to_vec().into());
        signer.authorize(&mut first).unwrap();

        let mut second = request("https://api.example.com/v1/users/me");
        *second.body_mut() = Some(payload.to_vec().into());
        signer.authorize(&mut second).unwrap();

        assert_eq!(
            first.headers().get(SIGNATURE_HEADER),
            second.headers().get(SIGNATURE_HEADER)
        );
        assert_eq!(
            first.headers().get(SIGNATURE_HEADER).unwrap(),
            signer.sign(payload).unwrap().as_str()
        );
        assert_eq!(first.body().and_then(|b| b.as_bytes()), Some(&payload[..]));
    }

    #[test]
    fn test_signature_known_digest() {
        // HMAC-SHA512("key", "The quick brown fox jumps over the lazy dog")
        let signer = SignatureAuthorizer::new("id", "key");
        assert_eq!(
            signer.sign(b"The quick brown fox jumps over the lazy dog").unwrap(),
            "tCrwkFe6weLUFwjkipAuCbX/fxKrQopP6GZTxz3SSPuC+UilSfe3kaW0GRXuTR7Dk1NX5OIxclDQNyr6Lr7rOg=="
        );
    }
}
