//! Top-level handle to the cartography service

use std::collections::BTreeSet;
use std::sync::Arc;

use cartograph_protocol::{codes, Method};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::codec::{self, Credentials, Domain, MapOptions, Query};
use crate::compare::{compare_page_types, CompareResult};
use crate::config::{ClientConfig, Endpoint};
use crate::error::{Error, ErrorKind, Result};
use crate::lifecycle;
use crate::model::{
    self, ActResult, AuthResult, HandshakeResult, MapInfo, Opcode, PageResult, PerceiveResult,
    RuntimeStatus, Session,
};
use crate::sitemap::{into_result, SiteMap};
use crate::transport::{Exchange, Transport};

/// Entry point: owns one channel shared by every [`SiteMap`] it produces
///
/// ```no_run
/// use cartograph_client::{Cartograph, ClientConfig, MapOptions, Query};
///
/// # async fn run() -> cartograph_client::Result<()> {
/// let client = Cartograph::connect(&ClientConfig::load()?).await?;
/// let site = client.map("https://example.com", &MapOptions::default(), None).await?;
/// let products = site.filter(&Query::new().page_type(0x04).limit(10)).await?;
/// println!("{site}: {} products", products.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Cartograph {
    exchange: Arc<dyn Exchange>,
}

impl Cartograph {
    /// Wait for the configured service to answer, then open a client to it
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        lifecycle::ensure_reachable(&config.socket_path, config.startup_timeout()).await?;
        Ok(Self::with_endpoint(&config.endpoint()))
    }

    /// Client for `endpoint` without probing it; the channel opens lazily
    pub fn with_endpoint(endpoint: &Endpoint) -> Self {
        Self::with_exchange(Arc::new(Transport::new(endpoint)))
    }

    pub fn with_exchange(exchange: Arc<dyn Exchange>) -> Self {
        Self { exchange }
    }

    pub fn exchange(&self) -> &Arc<dyn Exchange> {
        &self.exchange
    }

    /// Map `domain` into a navigable graph
    ///
    /// Accepts URLs as well as bare domains; see [`Domain::parse`].
    pub async fn map(
        &self,
        domain: &str,
        options: &MapOptions,
        session: Option<&Session>,
    ) -> Result<SiteMap> {
        let domain = Domain::parse(domain)?;
        let params = codec::map_params(&domain, options, session);
        let response = self.exchange.exchange(Method::Map, params).await?;
        let value = into_result(response, ErrorKind::Map, codes::MAP_FAILED)?;
        let info: MapInfo = model::decode(Method::Map, value)?;
        info!(
            domain = %domain,
            nodes = info.node_count,
            edges = info.edge_count,
            cached = info.cached,
            "Mapped site"
        );
        Ok(SiteMap::new(self.exchange.clone(), domain, info))
    }

    /// Map several domains one after another
    pub async fn map_many<S: AsRef<str>>(
        &self,
        domains: &[S],
        options: &MapOptions,
    ) -> Result<Vec<SiteMap>> {
        let mut sites = Vec::with_capacity(domains.len());
        for domain in domains {
            sites.push(self.map(domain.as_ref(), options, None).await?);
        }
        Ok(sites)
    }

    /// Map each domain and compare page-type coverage of its first `limit` nodes
    ///
    /// Computed locally from `map` and `filter` results.
    pub async fn compare<S: AsRef<str>>(&self, domains: &[S], limit: u32) -> Result<CompareResult> {
        let sites = self.map_many(domains, &MapOptions::default()).await?;
        let mut page_types = Vec::with_capacity(sites.len());
        for site in &sites {
            let nodes = site.filter(&Query::new().limit(limit)).await?;
            let types: BTreeSet<u8> = nodes.iter().map(|n| n.page_type).collect();
            page_types.push((site.domain().to_string(), types));
        }
        Ok(compare_page_types(&page_types))
    }

    /// Encode a single live page without mapping its site
    pub async fn perceive(&self, url: &str, include_content: bool) -> Result<PageResult> {
        let params = codec::perceive_params(url, include_content)?;
        let response = self.exchange.exchange(Method::Perceive, params).await?;
        let value = into_result(response, ErrorKind::NotFound, codes::NOT_FOUND)?;
        let result: PerceiveResult = model::decode(Method::Perceive, value)?;
        Ok(PageResult {
            url: url.to_string(),
            final_url: result.final_url.unwrap_or_else(|| url.to_string()),
            page_type: result.page_type,
            confidence: result.confidence,
            features: result.features,
            content: result.content,
        })
    }

    pub async fn perceive_many<S: AsRef<str>>(
        &self,
        urls: &[S],
        include_content: bool,
    ) -> Result<Vec<PageResult>> {
        let mut pages = Vec::with_capacity(urls.len());
        for url in urls {
            pages.push(self.perceive(url.as_ref(), include_content).await?);
        }
        Ok(pages)
    }

    pub async fn status(&self) -> Result<RuntimeStatus> {
        let response = self.exchange.exchange(Method::Status, json!({})).await?;
        let value = into_result(response, ErrorKind::Connection, codes::CONNECTION)?;
        model::decode(Method::Status, value)
    }

    /// Exchange versions with the service
    pub async fn handshake(&self) -> Result<HandshakeResult> {
        let response = self
            .exchange
            .exchange(Method::Handshake, codec::handshake_params())
            .await?;
        let value = into_result(response, ErrorKind::Connection, codes::CONNECTION)?;
        let result: HandshakeResult = model::decode(Method::Handshake, value)?;
        if !result.compatible {
            debug!(
                server_version = %result.server_version,
                protocol_version = result.protocol_version,
                "Service reports an incompatible protocol"
            );
        }
        Ok(result)
    }

    /// Authenticate against `domain` and return the service-issued session
    pub async fn login(&self, domain: &str, credentials: &Credentials) -> Result<Session> {
        let domain = Domain::parse(domain)?;
        let params = codec::auth_params(&domain, credentials);
        let response = self.exchange.exchange(Method::Auth, params).await?;
        let value = into_result(response, ErrorKind::Auth, codes::AUTH_FAILED)?;
        let result: AuthResult = model::decode(Method::Auth, value)?;

        let session_id = result
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::protocol("auth result is missing session_id"))?;
        debug!(domain = %domain, auth_type = credentials.auth_type(), "Logged in");
        Ok(Session {
            session_id,
            domain: result.domain.unwrap_or_else(|| domain.into_string()),
            auth_type: result
                .auth_type
                .unwrap_or_else(|| credentials.auth_type().to_string()),
            expires_at: result.expires_at,
        })
    }

    /// Act on a live page addressed by URL, without a prior `map`
    pub async fn act(
        &self,
        url: &str,
        opcode: Opcode,
        params: Option<&Value>,
        session: Option<&Session>,
    ) -> Result<ActResult> {
        let params = codec::act_url_params(url, opcode, params, session)?;
        let response = self.exchange.exchange(Method::Act, params).await?;
        let value = into_result(response, ErrorKind::Action, codes::ACT_FAILED)?;
        model::decode(Method::Act, value)
    }
}

impl std::fmt::Debug for Cartograph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cartograph").finish_non_exhaustive()
    }
}
