//! Artifact, info and stored-record type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CacheResult;

/// The cached unit: structured documents plus an optional raw weight payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artifact {
    /// Model topology document
    pub topology: Option<Value>,
    /// Weight specs document
    pub specs: Option<Value>,
    /// Raw weight bytes
    pub payload: Option<Vec<u8>>,
}

impl Artifact {
    /// Create a new artifact
    pub fn new(topology: Option<Value>, specs: Option<Value>, payload: Option<Vec<u8>>) -> Self {
        Self {
            topology,
            specs,
            payload,
        }
    }

    /// Create an artifact that only carries a payload
    pub fn with_payload(payload: Vec<u8>) -> Self {
        Self {
            payload: Some(payload),
            ..Self::default()
        }
    }

    /// Payload length in bytes (0 when there is no payload)
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Vec::len)
    }
}

/// Serialization format of the topology document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyType {
    #[serde(rename = "JSON")]
    Json,
}

impl std::fmt::Display for TopologyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyType::Json => write!(f, "JSON"),
        }
    }
}

/// Descriptive metadata about a save, stored in the info table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    /// When the artifact was saved
    pub saved_at: DateTime<Utc>,
    /// Topology serialization format
    pub topology_type: TopologyType,
    /// UTF-8 length of the serialized topology
    pub topology_byte_size: u64,
    /// UTF-8 length of the serialized weight specs
    pub spec_byte_size: u64,
    /// Length of the weight payload
    pub payload_byte_size: u64,
}

impl ArtifactInfo {
    /// Measure an artifact. Only the payload length is read, never its bytes.
    pub fn measure(artifact: &Artifact) -> CacheResult<Self> {
        Ok(Self {
            saved_at: Utc::now(),
            topology_type: TopologyType::Json,
            topology_byte_size: json_byte_size(artifact.topology.as_ref())?,
            spec_byte_size: json_byte_size(artifact.specs.as_ref())?,
            payload_byte_size: artifact.payload_len() as u64,
        })
    }

    /// Encode for the info table
    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an info table value
    pub fn decode(bytes: &[u8]) -> CacheResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn json_byte_size(doc: Option<&Value>) -> CacheResult<u64> {
    match doc {
        Some(doc) => Ok(serde_json::to_string(doc)?.len() as u64),
        None => Ok(0),
    }
}

/// Value stored in the artifact table.
///
/// When `chunk_keys` is set the payload lives in the chunk table and
/// `payload` is `None`; otherwise the payload (if any) is carried inline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub topology: Option<Value>,
    pub specs: Option<Value>,
    #[serde(default, with = "base64_payload")]
    pub payload: Option<Vec<u8>>,
    #[serde(default)]
    pub chunk_keys: Option<Vec<String>>,
}

impl ArtifactRecord {
    /// Build a record from an artifact whose payload is kept inline
    pub fn inline(artifact: Artifact) -> Self {
        Self {
            topology: artifact.topology,
            specs: artifact.specs,
            payload: artifact.payload,
            chunk_keys: None,
        }
    }

    /// Build a record whose payload has been persisted as chunks
    pub fn chunked(artifact: Artifact, chunk_keys: Vec<String>) -> Self {
        Self {
            topology: artifact.topology,
            specs: artifact.specs,
            payload: None,
            chunk_keys: Some(chunk_keys),
        }
    }

    /// Whether the payload lives in the chunk table
    pub fn is_chunked(&self) -> bool {
        self.chunk_keys.is_some()
    }

    /// Convert into the caller-facing artifact, dropping chunk bookkeeping
    pub fn into_artifact(self) -> Artifact {
        Artifact {
            topology: self.topology,
            specs: self.specs,
            payload: self.payload,
        }
    }

    /// Encode for the artifact table
    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an artifact table value
    pub fn decode(bytes: &[u8]) -> CacheResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

mod base64_payload {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match payload {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|e| STANDARD.decode(e).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// The three independently keyed tables of the cache database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Artifact path -> [`ArtifactInfo`]
    Info,
    /// Artifact path -> [`ArtifactRecord`]
    Artifact,
    /// Chunk key -> raw payload slice
    Chunk,
}

impl Table {
    /// All tables, in schema creation order
    pub const ALL: [Table; 3] = [Table::Artifact, Table::Info, Table::Chunk];

    /// Table name in the database
    pub const fn name(&self) -> &'static str {
        match self {
            Table::Info => "model_info",
            Table::Artifact => "models",
            Table::Chunk => "model_weights",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
