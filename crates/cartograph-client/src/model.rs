//! Value objects decoded from service responses
//!
//! Each type mirrors the `result` shape of one method. Missing keys fall back
//! to the defaults declared here and nowhere else.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use cartograph_protocol::Method;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Number of feature dimensions in every node's vector
pub const FEATURE_DIM: usize = 128;

/// Sparse feature vector: dimension index → value, absent dimensions are zero
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Features(BTreeMap<u8, f64>);

impl Features {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, dimension: u8) -> f64 {
        self.0.get(&dimension).copied().unwrap_or(0.0)
    }

    pub fn insert(&mut self, dimension: u8, value: f64) {
        self.0.insert(dimension, value);
    }

    /// Explicitly present dimensions, in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (u8, f64)> + '_ {
        self.0.iter().map(|(dim, value)| (*dim, *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Expand to all 128 dimensions
    pub fn to_dense(&self) -> Vec<f64> {
        let mut dense = vec![0.0; FEATURE_DIM];
        for (dim, value) in self.iter() {
            if let Some(slot) = dense.get_mut(dim as usize) {
                *slot = value;
            }
        }
        dense
    }
}

impl FromIterator<(u8, f64)> for Features {
    fn from_iter<I: IntoIterator<Item = (u8, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// An interactive capability on a page: `(category, action)`
///
/// Encoded on the wire as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Opcode(pub u8, pub u8);

impl Opcode {
    pub fn new(category: u8, action: u8) -> Self {
        Self(category, action)
    }

    pub fn category(&self) -> u8 {
        self.0
    }

    pub fn action(&self) -> u8 {
        self.1
    }
}

impl From<(u8, u8)> for Opcode {
    fn from((category, action): (u8, u8)) -> Self {
        Self(category, action)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:#04x}, {:#04x})", self.0, self.1)
    }
}

const PAGE_TYPE_NAMES: [&str; 18] = [
    "unknown",
    "home",
    "search_results",
    "product_listing",
    "product_detail",
    "article",
    "review_list",
    "media_page",
    "login",
    "cart",
    "checkout",
    "account",
    "documentation",
    "form_page",
    "about_page",
    "contact_page",
    "faq",
    "pricing_page",
];

/// Display name for a page type code, e.g. `0x04` → `product_detail`
pub fn page_type_name(code: u8) -> Cow<'static, str> {
    match PAGE_TYPE_NAMES.get(code as usize) {
        Some(name) => Cow::Borrowed(name),
        None => Cow::Owned(format!("type_{code:#04x}")),
    }
}

/// One graph node surfaced by a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMatch {
    /// Stable within this map's graph only
    pub index: u32,
    pub url: String,
    pub page_type: u8,
    pub confidence: f64,
    pub features: Features,
    /// Only set by nearest-neighbour queries
    pub similarity: Option<f64>,
}

impl fmt::Display for NodeMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let url: String = if self.url.chars().count() > 50 {
            format!("{}...", self.url.chars().take(50).collect::<String>())
        } else {
            self.url.clone()
        };
        write!(
            f,
            "NodeMatch(index={}, url={:?}, type={}, confidence={:.2}",
            self.index,
            url,
            page_type_name(self.page_type),
            self.confidence
        )?;
        if let Some(similarity) = self.similarity {
            write!(f, ", similarity={similarity:.3}")?;
        }
        f.write_str(")")
    }
}

/// An action that must be executed at `at_node` to continue along a path
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathAction {
    pub at_node: u32,
    pub opcode: Opcode,
}

impl fmt::Display for PathAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathAction(node={}, opcode={})", self.at_node, self.opcode)
    }
}

/// A route through the site graph, exactly as the service computed it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Path {
    /// Source to target, inclusive
    pub nodes: Vec<u32>,
    pub total_weight: f64,
    pub hops: u32,
    pub required_actions: Vec<PathAction>,
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Path(hops={}, nodes={:?}, weight={:.1})",
            self.hops, self.nodes, self.total_weight
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshResult {
    pub updated_count: u32,
    pub changed_nodes: Vec<u32>,
}

impl fmt::Display for RefreshResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RefreshResult(updated={}, changed={:?})",
            self.updated_count, self.changed_nodes
        )
    }
}

/// Outcome of an action
///
/// `success` is authoritative: a response without an error can still report
/// a failed action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActResult {
    pub success: bool,
    pub new_url: Option<String>,
    pub features: Features,
}

impl fmt::Display for ActResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActResult(success={}", self.success)?;
        if let Some(url) = &self.new_url {
            write!(f, ", new_url={url:?}")?;
        }
        f.write_str(")")
    }
}

/// A change observed on a watched node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchDelta {
    pub node: u32,
    /// dimension → (old, new)
    #[serde(default)]
    pub changed_features: BTreeMap<u8, (f64, f64)>,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for WatchDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<u8> = self.changed_features.keys().copied().collect();
        write!(f, "WatchDelta(node={}, changed_dims={:?})", self.node, dims)
    }
}

/// Authenticated context issued by the service
///
/// Opaque to the client: it is passed back by reference and never inspected
/// or refreshed here.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub domain: String,
    pub auth_type: String,
    #[serde(default, with = "timestamp::option")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &"<redacted>")
            .field("domain", &self.domain)
            .field("auth_type", &self.auth_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Encoding of a single perceived page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub url: String,
    pub final_url: String,
    pub page_type: u8,
    pub confidence: f64,
    pub features: Features,
    pub content: Option<String>,
}

impl fmt::Display for PageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PageResult(url={:?}, type={}, confidence={:.2})",
            self.url,
            page_type_name(self.page_type),
            self.confidence
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolStatus {
    pub active: u32,
    pub max: u32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeStatus {
    pub version: String,
    #[serde(alias = "uptime_s")]
    pub uptime_seconds: f64,
    pub active_contexts: u32,
    #[serde(alias = "maps_cached")]
    pub cached_maps: u32,
    #[serde(alias = "cache_mb")]
    pub memory_mb: f64,
    pub pool: Option<PoolStatus>,
}

impl Default for RuntimeStatus {
    fn default() -> Self {
        Self {
            version: "unknown".to_string(),
            uptime_seconds: 0.0,
            active_contexts: 0,
            cached_maps: 0,
            memory_mb: 0.0,
            pool: None,
        }
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RuntimeStatus(version={:?}, uptime={:.1}s, maps={})",
            self.version, self.uptime_seconds, self.cached_maps
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeResult {
    pub server_version: String,
    pub protocol_version: u16,
    pub compatible: bool,
}

/// Summary returned by `map`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapInfo {
    pub node_count: u64,
    pub edge_count: u64,
    pub map_path: Option<String>,
    pub cached: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct QueryResult {
    pub matches: Vec<NodeMatch>,
}

/// Page shape as sent by `perceive`, before the requested URL is filled in
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct PerceiveResult {
    pub final_url: Option<String>,
    pub page_type: u8,
    pub confidence: f64,
    pub features: Features,
    pub content: Option<String>,
}

/// Session shape as sent by `auth`; only `session_id` is mandatory
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct AuthResult {
    pub session_id: Option<String>,
    pub domain: Option<String>,
    pub auth_type: Option<String>,
    #[serde(with = "timestamp::option")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Decode a `result` payload into the method's shape
///
/// A `null` result decodes like an empty object, so every field takes its
/// default.
pub(crate) fn decode<T: DeserializeOwned>(method: Method, result: Value) -> Result<T> {
    let result = if result.is_null() {
        Value::Object(Default::default())
    } else {
        result
    };
    serde_json::from_value(result)
        .map_err(|e| Error::protocol(format!("Malformed {method} result: {e}")))
}

/// Timestamps arrive either as RFC 3339 strings or as unix seconds
pub(crate) mod timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(f64),
        Text(String),
    }

    fn convert<E: de::Error>(raw: Raw) -> Result<DateTime<Utc>, E> {
        match raw {
            Raw::Seconds(secs) => {
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9).round() as u32;
                Utc.timestamp_opt(whole as i64, nanos.min(999_999_999))
                    .single()
                    .ok_or_else(|| E::custom(format!("timestamp out of range: {secs}")))
            }
            Raw::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| E::custom(format!("invalid timestamp {text:?}: {e}"))),
        }
    }

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        convert(Raw::deserialize(deserializer)?)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<Raw>::deserialize(deserializer)? {
                Some(raw) => convert(raw).map(Some),
                None => Ok(None),
            }
        }
    }
}
