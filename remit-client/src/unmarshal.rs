//! Response body decoders keyed by content type.
//!
//! The request's `Accept` header selects the decoder. Absent or unregistered
//! values fall back to JSON.
//!
//! Registration takes a write lock, but the registry is meant to be filled at
//! startup. Registering decoders while requests are in flight is not a
//! supported use.

use crate::error::BoxError;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

/// Content type of the built-in JSON decoder.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type of [`FormUnmarshaler`].
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// Decodes a response body into a document the caller's type is read from.
pub trait Unmarshaler: Send + Sync {
    /// Decode everything `reader` yields.
    fn unmarshal(&self, reader: &mut dyn Read) -> Result<Value, BoxError>;
}

/// JSON decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonUnmarshaler;

impl Unmarshaler for JsonUnmarshaler {
    fn unmarshal(&self, reader: &mut dyn Read) -> Result<Value, BoxError> {
        Ok(serde_json::from_reader(reader)?)
    }
}

/// `application/x-www-form-urlencoded` decoder.
///
/// Produces a flat object of string values; repeated keys keep the last value.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormUnmarshaler;

impl Unmarshaler for FormUnmarshaler {
    fn unmarshal(&self, reader: &mut dyn Read) -> Result<Value, BoxError> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&raw)?;
        let object = pairs
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();
        Ok(Value::Object(object))
    }
}

/// Mapping from content type to decoder.
pub struct UnmarshalerRegistry {
    decoders: RwLock<HashMap<String, Arc<dyn Unmarshaler>>>,
}

impl UnmarshalerRegistry {
    /// A registry holding only the JSON decoder.
    pub fn new() -> Self {
        let mut decoders: HashMap<String, Arc<dyn Unmarshaler>> = HashMap::new();
        decoders.insert(CONTENT_TYPE_JSON.to_string(), Arc::new(JsonUnmarshaler));
        Self {
            decoders: RwLock::new(decoders),
        }
    }

    /// Register or replace the decoder for `content_type`.
    pub fn register(&self, content_type: impl Into<String>, unmarshaler: impl Unmarshaler + 'static) {
        self.decoders
            .write()
            .insert(content_type.into(), Arc::new(unmarshaler));
    }

    /// Decoder registered for `content_type`.
    pub fn get(&self, content_type: &str) -> Option<Arc<dyn Unmarshaler>> {
        self.decoders.read().get(content_type).cloned()
    }

    /// Whether a decoder is registered for `content_type`.
    pub fn contains(&self, content_type: &str) -> bool {
        self.decoders.read().contains_key(content_type)
    }

    /// Decode `body` with the decoder selected by `accept`.
    pub fn decode<T: DeserializeOwned>(&self, accept: Option<&str>, body: &[u8]) -> Result<T, BoxError> {
        match accept.and_then(|content_type| self.get(content_type)) {
            Some(unmarshaler) => {
                let mut reader = body;
                let document = unmarshaler.unmarshal(&mut reader)?;
                Ok(serde_json::from_value(document)?)
            }
            None => Ok(serde_json::from_slice(body)?),
        }
    }
}

impl Default for UnmarshalerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UnmarshalerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let decoders = self.decoders.read();
        let mut content_types: Vec<&String> = decoders.keys().collect();
        content_types.sort();
        f.debug_struct("UnmarshalerRegistry")
            .field("content_types", &content_types)
            .finish()
    }
}
