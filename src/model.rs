//! Wire-visible data model: identities, routes, loops and rules.
//!
//! Field names here are part of the wire contract (§6 of the design doc)
//! and must not be renamed casually.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte opaque visor identity, serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut buf = [0u8; 32];
        hex::decode_to_slice(s, &mut buf)?;
        Ok(PublicKey(buf))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

pub type Port = u16;
pub type RouteId = u32;

/// Opaque identifier of an already-established link between adjacent visors.
pub type TransportId = uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub pk: PublicKey,
    pub port: Port,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub from: PublicKey,
    pub to: PublicKey,
    pub tp: TransportId,
}

/// Ordered chain of hops; `hops[i].to == hops[i+1].from`. May be empty.
pub type Route = Vec<Hop>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loop {
    pub local: Address,
    pub remote: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDescriptor {
    #[serde(rename = "loop")]
    pub loop_: Loop,
    pub forward: Route,
    pub reverse: Route,
    pub expiry: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopData {
    #[serde(rename = "loop")]
    pub loop_: Loop,
    pub route_id: RouteId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Rule {
    #[serde(rename = "forward")]
    Forward {
        expiry: chrono::DateTime<chrono::Utc>,
        next_route_id: RouteId,
        next_transport: TransportId,
        route_id: RouteId,
    },
    #[serde(rename = "app")]
    App {
        expiry: chrono::DateTime<chrono::Utc>,
        #[serde(default)]
        responding_route_id: RouteId,
        remote_pk: PublicKey,
        remote_port: Port,
        local_port: Port,
        route_id: RouteId,
    },
}
