//! Binary payloads moved between the network, the store and local handles.

use bytes::Bytes;

/// An immutable byte payload with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryResource {
    bytes: Bytes,
    content_type: Option<String>,
}

impl BinaryResource {
    pub fn new(bytes: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self { bytes: bytes.into(), content_type }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Byte length of the payload.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
