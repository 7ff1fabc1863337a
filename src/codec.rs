//! Value Codec Module
//!
//! Encodes cached values into the byte form shared by both tiers.

use std::fmt;
use std::str::FromStr;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{CacheError, Result};

// == Serialization Format ==
/// Wire format used for cached values in L1 and L2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationFormat {
    /// UTF-8 JSON via serde_json
    #[default]
    Json,
    /// Binary CBOR via ciborium
    Cbor,
}

impl SerializationFormat {
    /// Encodes a value into bytes.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            SerializationFormat::Json => serde_json::to_vec(value)
                .map_err(|e| CacheError::Serialization(format!("json encode: {}", e))),
            SerializationFormat::Cbor => {
                let mut buf = Vec::new();
                ciborium::ser::into_writer(value, &mut buf)
                    .map_err(|e| CacheError::Serialization(format!("cbor encode: {}", e)))?;
                Ok(buf)
            }
        }
    }

    /// Decodes bytes produced by [`encode`](Self::encode) with the same format.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            SerializationFormat::Json => serde_json::from_slice(bytes)
                .map_err(|e| CacheError::Serialization(format!("json decode: {}", e))),
            SerializationFormat::Cbor => ciborium::de::from_reader(bytes)
                .map_err(|e| CacheError::Serialization(format!("cbor decode: {}", e))),
        }
    }
}

impl fmt::Display for SerializationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationFormat::Json => f.write_str("json"),
            SerializationFormat::Cbor => f.write_str("cbor"),
        }
    }
}

impl FromStr for SerializationFormat {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(SerializationFormat::Json),
            "cbor" => Ok(SerializationFormat::Cbor),
            other => Err(CacheError::Configuration(format!(
                "unknown serialization format '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct SearchHit {
        doc_id: String,
        score: f32,
    }

    #[test]
    fn test_json_and_cbor_decode_what_they_encode() {
        let hits = vec![
            SearchHit { doc_id: "mail-1".into(), score: 0.91 },
            SearchHit { doc_id: "mail-7".into(), score: 0.42 },
        ];

        for format in [SerializationFormat::Json, SerializationFormat::Cbor] {
            let bytes = format.encode(&hits).unwrap();
            let decoded: Vec<SearchHit> = format.decode(&bytes).unwrap();
            assert_eq!(decoded, hits, "format {}", format);
        }
    }

    #[test]
    fn test_decode_wrong_shape_is_serialization_error() {
        let bytes = SerializationFormat::Json.encode(&"just a string").unwrap();
        let result: Result<Vec<f32>> = SerializationFormat::Json.decode(&bytes);
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[test]
    fn test_cross_format_decode_fails() {
        let bytes = SerializationFormat::Cbor.encode(&vec![1u32, 2, 3]).unwrap();
        let result: Result<Vec<u32>> = SerializationFormat::Json.decode(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("JSON".parse::<SerializationFormat>().unwrap(), SerializationFormat::Json);
        assert_eq!(" cbor ".parse::<SerializationFormat>().unwrap(), SerializationFormat::Cbor);
        assert!(matches!(
            "yaml".parse::<SerializationFormat>(),
            Err(CacheError::Configuration(_))
        ));
    }
}
