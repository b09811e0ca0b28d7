//! Base64 serialization utilities for serde
//!
//! Certificates, keys and clipboard payloads are raw bytes; in JSON they are
//! stored as base64 strings.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Deserializer, Serializer};

/// `Vec<u8>` as one base64 string: `#[serde(with = "crate::serde_utils::base64_bytes")]`
pub mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        decode(String::deserialize(deserializer)?)
    }
}

fn decode<E: serde::de::Error>(encoded: String) -> Result<Vec<u8>, E> {
    BASE64.decode(encoded.as_bytes()).map_err(E::custom)
}

/// Name-keyed certificate maps with base64 values
pub mod base64_map {
    use std::collections::BTreeMap;

    use serde::ser::SerializeMap;

    use super::*;

    pub fn serialize<S>(map: &BTreeMap<String, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (name, bytes) in map {
            out.serialize_entry(name, &BASE64.encode(bytes))?;
        }
        out.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: BTreeMap<String, String> = Deserialize::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(name, s)| decode(s).map(|bytes| (name, bytes)))
            .collect()
    }
}
