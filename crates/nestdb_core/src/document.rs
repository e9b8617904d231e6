//! Encoded documents.
//!
//! Work units never look inside a document; they only route the encoded
//! bytes to the right collection. [`Document`] is the opaque carrier.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Whether a document is written as a plain document or as an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentVariant {
    /// A plain document.
    Document,
    /// An edge document linking two other documents.
    Edge,
}

/// A CBOR-encoded document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Document {
    bytes: Vec<u8>,
}

impl Document {
    /// Encodes a serializable value as a document.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the value cannot be serialized.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> CoreResult<Self> {
        let mut bytes = Vec::new();
        ciborium::into_writer(value, &mut bytes).map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(Self { bytes })
    }

    /// Wraps already encoded bytes without validating them.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Decodes the document into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the bytes do not decode as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> CoreResult<T> {
        ciborium::from_reader(self.bytes.as_slice()).map_err(|e| CoreError::codec(e.to_string()))
    }

    /// Returns the encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the document has no bytes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
        stars: u8,
    }

    #[test]
    fn encode_and_decode_struct() {
        let note = Note {
            title: "hello".into(),
            stars: 3,
        };
        let doc = Document::encode(&note).unwrap();
        assert!(!doc.is_empty());
        assert_eq!(doc.decode::<Note>().unwrap(), note);
    }

    #[test]
    fn identical_maps_encode_identically() {
        let mut a = BTreeMap::new();
        a.insert("b", 2);
        a.insert("a", 1);
        let mut b = BTreeMap::new();
        b.insert("a", 1);
        b.insert("b", 2);

        assert_eq!(
            Document::encode(&a).unwrap(),
            Document::encode(&b).unwrap()
        );
    }

    #[test]
    fn decode_garbage_fails() {
        let doc = Document::from_bytes(vec![0xff, 0x00]);
        let result = doc.decode::<Note>();
        assert!(matches!(result, Err(CoreError::Codec { .. })));
    }
}
