//! Parameter builders for every service method
//!
//! All client-side validation happens here, before anything reaches the
//! channel. Builders are pure: they take typed arguments and return the JSON
//! `params` object for one request.

use std::collections::BTreeMap;
use std::fmt;

use cartograph_protocol::PROTOCOL_VERSION;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::model::{Opcode, Session, FEATURE_DIM};

/// A normalized host, optionally with a port (`example.com`, `localhost:3000`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    /// Strip scheme, path and trailing dots from user input
    ///
    /// `"https://amazon.com/dp/X"` → `amazon.com`; `"localhost:3000"` keeps
    /// its port. Empty input is rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_input("domain cannot be empty"));
        }

        let rest = match trimmed.find("://") {
            Some(idx) => &trimmed[idx + 3..],
            None => trimmed.strip_prefix("//").unwrap_or(trimmed),
        };
        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        let host = match authority.rsplit_once('@') {
            Some((_, host)) => host,
            None => authority,
        };
        let host = host.trim_end_matches('.');

        if host.is_empty() {
            return Err(Error::invalid_input(format!(
                "domain cannot be empty (input was {input:?})"
            )));
        }
        Ok(Self(host.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a domain string; see [`Domain::parse`]
pub fn normalize_domain(input: &str) -> Result<String> {
    Domain::parse(input).map(Domain::into_string)
}

fn check_dimension(dimension: u8) -> Result<()> {
    if (dimension as usize) < FEATURE_DIM {
        Ok(())
    } else {
        Err(Error::invalid_input(format!(
            "feature dimension {dimension} is out of range (0..{FEATURE_DIM})"
        )))
    }
}

fn check_finite(what: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::invalid_input(format!("{what} must be finite, got {value}")))
    }
}

/// Crawl budget for `map`
#[derive(Debug, Clone, PartialEq)]
pub struct MapOptions {
    pub max_nodes: u32,
    pub max_render: u32,
    pub max_time_ms: u64,
    pub respect_robots: bool,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            max_nodes: 50_000,
            max_render: 200,
            max_time_ms: 10_000,
            respect_robots: true,
        }
    }
}

pub fn map_params(domain: &Domain, options: &MapOptions, session: Option<&Session>) -> Value {
    let mut params = json!({
        "domain": domain,
        "max_nodes": options.max_nodes,
        "max_render": options.max_render,
        "max_time_ms": options.max_time_ms,
        "respect_robots": options.respect_robots,
    });
    if let Some(session) = session {
        params["session_id"] = json!(session.session_id);
    }
    params
}

/// One page type code or several; always sent as a list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageTypeFilter {
    One(u8),
    Many(Vec<u8>),
}

impl PageTypeFilter {
    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            PageTypeFilter::One(code) => vec![*code],
            PageTypeFilter::Many(codes) => codes.clone(),
        }
    }
}

impl From<u8> for PageTypeFilter {
    fn from(code: u8) -> Self {
        PageTypeFilter::One(code)
    }
}

impl From<Vec<u8>> for PageTypeFilter {
    fn from(codes: Vec<u8>) -> Self {
        PageTypeFilter::Many(codes)
    }
}

impl From<&[u8]> for PageTypeFilter {
    fn from(codes: &[u8]) -> Self {
        PageTypeFilter::Many(codes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for PageTypeFilter {
    fn from(codes: [u8; N]) -> Self {
        PageTypeFilter::Many(codes.to_vec())
    }
}

/// Comparison applied to a feature dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureOp {
    Gt,
    Lt,
    Min,
    Max,
}

impl FeatureOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureOp::Gt => "gt",
            FeatureOp::Lt => "lt",
            FeatureOp::Min => "min",
            FeatureOp::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortBy {
    pub dimension: u8,
    pub direction: SortDirection,
}

/// Filter criteria for `SiteMap::filter`
///
/// ```
/// use cartograph_client::{FeatureOp, Query, SortDirection};
///
/// // Product pages under 300 with rating above 0.8, cheapest first
/// let query = Query::new()
///     .page_type(0x04)
///     .feature(48, FeatureOp::Lt, 300.0)
///     .feature(52, FeatureOp::Gt, 0.8)
///     .sort_by(48, SortDirection::Asc)
///     .limit(20);
/// assert_eq!(query.limit, 20);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub page_type: Option<PageTypeFilter>,
    pub features: BTreeMap<u8, BTreeMap<FeatureOp, f64>>,
    pub flags: BTreeMap<String, bool>,
    pub sort_by: Option<SortBy>,
    pub limit: u32,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            page_type: None,
            features: BTreeMap::new(),
            flags: BTreeMap::new(),
            sort_by: None,
            limit: 100,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_type(mut self, filter: impl Into<PageTypeFilter>) -> Self {
        self.page_type = Some(filter.into());
        self
    }

    pub fn feature(mut self, dimension: u8, op: FeatureOp, threshold: f64) -> Self {
        self.features.entry(dimension).or_default().insert(op, threshold);
        self
    }

    pub fn flag(mut self, name: impl Into<String>, value: bool) -> Self {
        self.flags.insert(name.into(), value);
        self
    }

    pub fn sort_by(mut self, dimension: u8, direction: SortDirection) -> Self {
        self.sort_by = Some(SortBy { dimension, direction });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

pub fn query_params(domain: &Domain, query: &Query) -> Result<Value> {
    let mut params = Map::new();
    params.insert("domain".into(), json!(domain));
    params.insert("limit".into(), json!(query.limit));

    if let Some(filter) = &query.page_type {
        params.insert("page_type".into(), json!(filter.to_vec()));
    }

    if !query.features.is_empty() {
        let mut features = Map::new();
        for (dimension, conditions) in &query.features {
            check_dimension(*dimension)?;
            let mut ops = Map::new();
            for (op, threshold) in conditions {
                check_finite("feature threshold", *threshold)?;
                ops.insert(op.as_str().into(), json!(threshold));
            }
            features.insert(dimension.to_string(), Value::Object(ops));
        }
        params.insert("features".into(), Value::Object(features));
    }

    if !query.flags.is_empty() {
        params.insert("flags".into(), json!(query.flags));
    }

    if let Some(sort) = &query.sort_by {
        check_dimension(sort.dimension)?;
        params.insert("sort_by".into(), json!(sort));
    }

    Ok(Value::Object(params))
}

/// Nearest-neighbour query: `goal_vector` must have exactly 128 finite entries
pub fn nearest_params(domain: &Domain, goal_vector: &[f64], k: u32) -> Result<Value> {
    if goal_vector.len() != FEATURE_DIM {
        return Err(Error::invalid_input(format!(
            "Goal vector must be {FEATURE_DIM} dimensions, got {}",
            goal_vector.len()
        )));
    }
    for value in goal_vector {
        check_finite("goal vector entry", *value)?;
    }

    let mut params = query_params(domain, &Query::new().limit(k))?;
    params["mode"] = json!("nearest");
    params["goal_vector"] = json!(goal_vector);
    Ok(params)
}

/// What the shortest path minimizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Minimize {
    #[default]
    Hops,
    Weight,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathOptions {
    /// Node flags the path must not pass through (e.g. `auth_required`)
    pub avoid_flags: Vec<String>,
    pub minimize: Minimize,
}

impl PathOptions {
    pub fn avoid(mut self, flag: impl Into<String>) -> Self {
        self.avoid_flags.push(flag.into());
        self
    }

    pub fn minimize(mut self, minimize: Minimize) -> Self {
        self.minimize = minimize;
        self
    }
}

pub fn pathfind_params(domain: &Domain, from: u32, to: u32, options: &PathOptions) -> Value {
    json!({
        "domain": domain,
        "from": from,
        "to": to,
        "avoid_flags": options.avoid_flags,
        "minimize": options.minimize,
    })
}

/// Which nodes to re-render; selectors are independent and additive
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshSelector {
    pub nodes: Option<Vec<u32>>,
    pub cluster: Option<u32>,
    /// Only nodes whose freshness is below this
    pub stale_threshold: Option<f64>,
}

impl RefreshSelector {
    pub fn nodes(nodes: impl Into<Vec<u32>>) -> Self {
        Self {
            nodes: Some(nodes.into()),
            ..Self::default()
        }
    }

    pub fn cluster(mut self, cluster: u32) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn stale_threshold(mut self, threshold: f64) -> Self {
        self.stale_threshold = Some(threshold);
        self
    }

    fn is_empty(&self) -> bool {
        self.nodes.is_none() && self.cluster.is_none() && self.stale_threshold.is_none()
    }
}

pub fn refresh_params(domain: &Domain, selector: &RefreshSelector) -> Result<Value> {
    if selector.is_empty() {
        tracing::debug!(domain = %domain, "Refresh sent without selectors");
    }
    let mut params = json!({ "domain": domain });
    if let Some(nodes) = &selector.nodes {
        params["nodes"] = json!(nodes);
    }
    if let Some(cluster) = selector.cluster {
        params["cluster"] = json!(cluster);
    }
    if let Some(threshold) = selector.stale_threshold {
        check_finite("stale_threshold", threshold)?;
        params["stale_threshold"] = json!(threshold);
    }
    Ok(params)
}

pub fn act_params(
    domain: &Domain,
    node: u32,
    opcode: Opcode,
    params: Option<&Value>,
    session: Option<&Session>,
) -> Value {
    let mut out = json!({
        "domain": domain,
        "node": node,
        "opcode": opcode,
    });
    if let Some(params) = params {
        out["params"] = params.clone();
    }
    if let Some(session) = session {
        out["session_id"] = json!(session.session_id);
    }
    out
}

/// Act on a live page addressed by URL rather than by node
pub fn act_url_params(
    url: &str,
    opcode: Opcode,
    params: Option<&Value>,
    session: Option<&Session>,
) -> Result<Value> {
    let domain = Domain::parse(url)?;
    let mut out = act_params(&domain, 0, opcode, params, session);
    out["url"] = json!(url);
    Ok(out)
}

pub fn perceive_params(url: &str, include_content: bool) -> Result<Value> {
    if url.trim().is_empty() {
        return Err(Error::invalid_input("url cannot be empty"));
    }
    Ok(json!({ "url": url, "include_content": include_content }))
}

/// Registration for change notifications
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSpec {
    pub nodes: Option<Vec<u32>>,
    pub cluster: Option<u32>,
    /// Feature dimensions to monitor
    pub features: Option<Vec<u8>>,
    pub interval_ms: u64,
}

impl Default for WatchSpec {
    fn default() -> Self {
        Self {
            nodes: None,
            cluster: None,
            features: None,
            interval_ms: 60_000,
        }
    }
}

pub fn watch_params(domain: &Domain, spec: &WatchSpec) -> Result<Value> {
    let mut params = json!({
        "domain": domain,
        "interval_ms": spec.interval_ms,
    });
    if let Some(nodes) = &spec.nodes {
        params["nodes"] = json!(nodes);
    }
    if let Some(cluster) = spec.cluster {
        params["cluster"] = json!(cluster);
    }
    if let Some(features) = &spec.features {
        for dimension in features {
            check_dimension(*dimension)?;
        }
        params["features"] = json!(features);
    }
    Ok(params)
}

/// Login material for `auth`
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password { username: String, password: String },
    OAuth { provider: String },
    ApiKey { key: String, header_name: String },
}

impl Credentials {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn oauth(provider: impl Into<String>) -> Self {
        Credentials::OAuth {
            provider: provider.into(),
        }
    }

    /// API key sent in the `X-Api-Key` header
    pub fn api_key(key: impl Into<String>) -> Self {
        Credentials::ApiKey {
            key: key.into(),
            header_name: "X-Api-Key".to_string(),
        }
    }

    pub fn with_header(self, header_name: impl Into<String>) -> Self {
        match self {
            Credentials::ApiKey { key, .. } => Credentials::ApiKey {
                key,
                header_name: header_name.into(),
            },
            other => other,
        }
    }

    pub fn auth_type(&self) -> &'static str {
        match self {
            Credentials::Password { .. } => "password",
            Credentials::OAuth { .. } => "oauth",
            Credentials::ApiKey { .. } => "api_key",
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Credentials::oauth("google")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::OAuth { provider } => {
                f.debug_struct("OAuth").field("provider", provider).finish()
            }
            Credentials::ApiKey { header_name, .. } => f
                .debug_struct("ApiKey")
                .field("key", &"<redacted>")
                .field("header_name", header_name)
                .finish(),
        }
    }
}

pub fn auth_params(domain: &Domain, credentials: &Credentials) -> Value {
    let mut params = json!({
        "domain": domain,
        "auth_type": credentials.auth_type(),
    });
    match credentials {
        Credentials::Password { username, password } => {
            params["username"] = json!(username);
            params["password"] = json!(password);
        }
        Credentials::OAuth { provider } => {
            params["provider"] = json!(provider);
        }
        Credentials::ApiKey { key, header_name } => {
            params["key"] = json!(key);
            params["header_name"] = json!(header_name);
        }
    }
    params
}

pub fn handshake_params() -> Value {
    json!({
        "client_version": env!("CARGO_PKG_VERSION"),
        "protocol_version": PROTOCOL_VERSION,
    })
}
