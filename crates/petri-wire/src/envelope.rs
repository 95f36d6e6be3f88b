use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WireError;

/// Wire envelope carried on every master↔worker frame.
///
/// Envelopes are MessagePack-encoded. The `topic` drives dispatch on the
/// receiving side; `correlation_id` matches replies (and streamed reply
/// chunks) to the request that caused them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,

    /// MessagePack-encoded payload bytes.
    #[serde(with = "raw_bytes")]
    pub payload: Vec<u8>,

    pub sent_at: DateTime<Utc>,

    pub correlation_id: Uuid,
}

impl Envelope {
    /// Wrap a payload under the given topic with a fresh correlation id.
    pub fn encode<T: Serialize>(topic: impl Into<String>, payload: &T) -> Result<Self, WireError> {
        Ok(Self {
            topic: topic.into(),
            payload: rmp_serde::to_vec(payload)?,
            sent_at: Utc::now(),
            correlation_id: Uuid::new_v4(),
        })
    }

    /// Wrap a reply payload, reusing the correlation id of the request.
    pub fn reply_to<T: Serialize>(
        &self,
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, WireError> {
        Ok(Self {
            topic: topic.into(),
            payload: rmp_serde::to_vec(payload)?,
            sent_at: Utc::now(),
            correlation_id: self.correlation_id,
        })
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, WireError> {
        Ok(rmp_serde::from_slice(&self.payload)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Serde helper so `Vec<u8>` travels as raw MessagePack bytes, not an int array.
mod raw_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrip() {
        let env = Envelope::encode("cells.compute", &vec![1u32, 2, 3]).unwrap();
        assert_eq!(env.topic, "cells.compute");
        assert_eq!(env.decode::<Vec<u32>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn envelope_bytes_roundtrip() {
        let env = Envelope::encode("workers.register", &"w1".to_string()).unwrap();
        let bytes = env.to_bytes().unwrap();
        let back = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(back.topic, env.topic);
        assert_eq!(back.correlation_id, env.correlation_id);
        assert_eq!(back.decode::<String>().unwrap(), "w1");
    }

    #[test]
    fn reply_keeps_correlation_id() {
        let req = Envelope::encode("cells.compute", &1u8).unwrap();
        let rep = req.reply_to("cells.compute.reply", &2u8).unwrap();
        assert_eq!(rep.correlation_id, req.correlation_id);
        assert_eq!(rep.topic, "cells.compute.reply");
    }
}
