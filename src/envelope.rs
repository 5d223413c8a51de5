//! Versioned event envelope.
//!
//! Every record that crosses the broker is wrapped in an [`Envelope`]. The
//! envelope carries identity, a kind tag, a creation timestamp and a schema
//! version; the payload is nested opaquely under `data` using the payload
//! type's own serde implementation.
//!
//! Wire form:
//! ```text
//! {"id": "...", "event_type": "message", "timestamp": "...", "version": "1.0", "data": {...}}
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;
use uuid::Uuid;

/// Schema version stamped on newly wrapped envelopes.
pub const SCHEMA_VERSION: &str = "1.0";

/// Capability required of anything carried in an [`Envelope`].
///
/// The payload owns its serialized shape; the envelope only nests it.
pub trait Eventable: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Fixed tag identifying the payload's logical type on the wire.
    const KIND: &'static str;
}

/// Errors produced while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The record is not a structurally valid envelope.
    #[error("Malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The envelope decoded but its payload does not match the expected type.
    #[error("Undecodable payload in envelope {id} (kind={kind}, version={version}): {source}")]
    Payload {
        id: String,
        kind: String,
        version: String,
        #[source]
        source: serde_json::Error,
    },

    /// The envelope is tagged with a kind other than the expected payload's.
    #[error("Envelope {id} has kind {found}, expected {expected}")]
    KindMismatch {
        id: String,
        expected: &'static str,
        found: String,
    },

    #[error("Envelope encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

impl EnvelopeError {
    /// Returns true if retrying the decode can never succeed.
    pub fn is_poison(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_) | Self::Payload { .. } | Self::KindMismatch { .. }
        )
    }
}

/// Immutable wrapper giving a payload a uniform wire representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    id: String,
    kind: String,
    timestamp: DateTime<Utc>,
    schema_version: String,
    payload: T,
}

/// Borrowed wire view used for encoding.
#[derive(Serialize)]
struct WireEnvelopeRef<'a, T> {
    id: &'a str,
    event_type: &'a str,
    timestamp: &'a DateTime<Utc>,
    version: &'a str,
    data: &'a T,
}

/// Owned wire view used for decoding. `data` stays untyped until the
/// envelope fields have been validated.
#[derive(Deserialize)]
struct WireEnvelope {
    id: String,
    event_type: String,
    timestamp: DateTime<Utc>,
    version: String,
    data: serde_json::Value,
}

impl<T: Eventable> Envelope<T> {
    /// Wrap a payload with a fresh id, the current time and the current schema version.
    pub fn wrap(payload: T) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: T::KIND.to_string(),
            timestamp: Utc::now(),
            schema_version: SCHEMA_VERSION.to_string(),
            payload,
        }
    }

    /// Encode to the JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Encode)
    }

    /// Decode from the JSON wire form.
    ///
    /// Unknown schema versions are accepted: envelope fields are extracted and
    /// the payload decode is still attempted. An envelope of another kind is
    /// rejected even if its payload would decode as `T`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let wire: WireEnvelope = serde_json::from_slice(bytes).map_err(EnvelopeError::Malformed)?;

        if wire.event_type != T::KIND {
            return Err(EnvelopeError::KindMismatch {
                id: wire.id,
                expected: T::KIND,
                found: wire.event_type,
            });
        }

        if wire.version != SCHEMA_VERSION {
            debug!(
                envelope_id = %wire.id,
                version = %wire.version,
                expected = SCHEMA_VERSION,
                "Decoding envelope with unknown schema version"
            );
        }

        let payload = match serde_json::from_value::<T>(wire.data) {
            Ok(payload) => payload,
            Err(source) => {
                return Err(EnvelopeError::Payload {
                    id: wire.id,
                    kind: wire.event_type,
                    version: wire.version,
                    source,
                })
            }
        };

        Ok(Self {
            id: wire.id,
            kind: wire.event_type,
            timestamp: wire.timestamp,
            schema_version: wire.version,
            payload,
        })
    }
}

impl<T> Envelope<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Serialize> Serialize for Envelope<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireEnvelopeRef {
            id: &self.id,
            event_type: &self.kind,
            timestamp: &self.timestamp,
            version: &self.schema_version,
            data: &self.payload,
        }
        .serialize(serializer)
    }
}
