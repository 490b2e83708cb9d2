//! Navigation over a mapped site
//!
//! A [`SiteMap`] is a thin handle: the graph itself lives in the service and
//! every operation is one request over the shared [`Exchange`].

use std::fmt;
use std::sync::Arc;

use cartograph_protocol::{codes, Method, Response};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::codec::{self, Domain, PathOptions, Query, RefreshSelector, WatchSpec};
use crate::error::{Error, ErrorKind, Result};
use crate::model::{
    self, ActResult, MapInfo, NodeMatch, Opcode, Path, QueryResult, RefreshResult, Session,
    WatchDelta,
};
use crate::transport::Exchange;

/// Unwrap a response envelope, mapping a service error to `kind`
pub(crate) fn into_result(
    response: Response,
    kind: ErrorKind,
    default_code: &str,
) -> Result<Value> {
    match response {
        Response::Result(value) => Ok(value),
        Response::Error(err) => Err(Error::from_service(kind, err, default_code)),
    }
}

/// A site graph held by the service
#[derive(Clone)]
pub struct SiteMap {
    exchange: Arc<dyn Exchange>,
    domain: Domain,
    node_count: u64,
    edge_count: u64,
    map_path: Option<String>,
    cached: bool,
}

impl SiteMap {
    pub fn new(exchange: Arc<dyn Exchange>, domain: Domain, info: MapInfo) -> Self {
        Self {
            exchange,
            domain,
            node_count: info.node_count,
            edge_count: info.edge_count,
            map_path: info.map_path,
            cached: info.cached,
        }
    }

    pub fn domain(&self) -> &str {
        self.domain.as_str()
    }

    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    pub fn edge_count(&self) -> u64 {
        self.edge_count
    }

    /// Where the service persisted the map, if it says
    pub fn map_path(&self) -> Option<&str> {
        self.map_path.as_deref()
    }

    /// Whether the service answered from its cache instead of crawling
    pub fn cached(&self) -> bool {
        self.cached
    }

    /// Nodes matching `query`, in service order
    ///
    /// No matches is an empty `Vec`, never an error.
    pub async fn filter(&self, query: &Query) -> Result<Vec<NodeMatch>> {
        let params = codec::query_params(&self.domain, query)?;
        self.run_query(params).await
    }

    /// The `k` nodes closest to `goal_vector`
    ///
    /// The vector must have exactly 128 entries; otherwise nothing is sent.
    pub async fn nearest(&self, goal_vector: &[f64], k: u32) -> Result<Vec<NodeMatch>> {
        let params = codec::nearest_params(&self.domain, goal_vector, k)?;
        self.run_query(params).await
    }

    async fn run_query(&self, params: Value) -> Result<Vec<NodeMatch>> {
        let response = self.exchange.exchange(Method::Query, params).await?;
        let value = into_result(response, ErrorKind::NotFound, codes::NOT_FOUND)?;
        let result: QueryResult = model::decode(Method::Query, value)?;
        debug!(domain = %self.domain, matches = result.matches.len(), "Query answered");
        Ok(result.matches)
    }

    /// Shortest route between two nodes, or `None` when none exists
    pub async fn pathfind(
        &self,
        from: u32,
        to: u32,
        options: &PathOptions,
    ) -> Result<Option<Path>> {
        let params = codec::pathfind_params(&self.domain, from, to, options);
        match self.exchange.exchange(Method::Pathfind, params).await? {
            Response::Error(err) if err.code == codes::NO_PATH => {
                debug!(domain = %self.domain, from, to, "No path between nodes");
                Ok(None)
            }
            response => {
                let value = into_result(response, ErrorKind::Path, codes::PATH_FAILED)?;
                model::decode(Method::Pathfind, value).map(Some)
            }
        }
    }

    /// Re-render selected nodes and update their features
    pub async fn refresh(&self, selector: &RefreshSelector) -> Result<RefreshResult> {
        let params = codec::refresh_params(&self.domain, selector)?;
        let response = self.exchange.exchange(Method::Refresh, params).await?;
        let value = into_result(response, ErrorKind::Action, codes::ACT_FAILED)?;
        model::decode(Method::Refresh, value)
    }

    /// Execute `opcode` on a node of the live site
    ///
    /// A result with `success == false` is returned as-is.
    pub async fn act(
        &self,
        node: u32,
        opcode: Opcode,
        params: Option<&Value>,
        session: Option<&Session>,
    ) -> Result<ActResult> {
        let params = codec::act_params(&self.domain, node, opcode, params, session);
        let response = self.exchange.exchange(Method::Act, params).await?;
        let value = into_result(response, ErrorKind::Action, codes::ACT_FAILED)?;
        let result: ActResult = model::decode(Method::Act, value)?;
        debug!(
            domain = %self.domain,
            node,
            opcode = %opcode,
            success = result.success,
            "Action finished"
        );
        Ok(result)
    }

    /// Register interest in changes to the selected nodes
    ///
    /// Only the registration is sent. The service does not push deltas over
    /// this channel, so the returned stream ends immediately.
    pub async fn watch(&self, spec: &WatchSpec) -> Result<BoxStream<'static, WatchDelta>> {
        let params = codec::watch_params(&self.domain, spec)?;
        let response = self.exchange.exchange(Method::Watch, params).await?;
        into_result(response, ErrorKind::Action, codes::ACT_FAILED)?;
        debug!(domain = %self.domain, interval_ms = spec.interval_ms, "Watch registered");
        Ok(stream::empty().boxed())
    }
}

impl fmt::Display for SiteMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SiteMap(domain={:?}, nodes={}, edges={})",
            self.domain.as_str(),
            self.node_count,
            self.edge_count
        )
    }
}

impl fmt::Debug for SiteMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteMap")
            .field("domain", &self.domain)
            .field("node_count", &self.node_count)
            .field("edge_count", &self.edge_count)
            .field("map_path", &self.map_path)
            .field("cached", &self.cached)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FeatureOp, SortDirection};
    use crate::testing::ScriptedExchange;
    use serde_json::json;

    fn site(exchange: &Arc<ScriptedExchange>) -> SiteMap {
        let info = MapInfo {
            node_count: 42,
            edge_count: 97,
            map_path: None,
            cached: false,
        };
        let exchange: Arc<dyn Exchange> = exchange.clone();
        SiteMap::new(exchange, Domain::parse("example.com").unwrap(), info)
    }

    #[tokio::test]
    async fn test_filter_decodes_matches() {
        let exchange = Arc::new(ScriptedExchange::new().reply(Response::result(json!({
            "matches": [
                {"index": 3, "url": "https://example.com/a", "page_type": 4,
                 "confidence": 0.9, "features": {"48": 19.99}},
                {"index": 7, "url": "https://example.com/b", "page_type": 4}
            ]
        }))));
        let query = Query::new()
            .page_type(4)
            .feature(48, FeatureOp::Lt, 300.0)
            .sort_by(48, SortDirection::Asc);

        let matches = site(&exchange).filter(&query).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].index, 3);
        assert_eq!(matches[0].features.get(48), 19.99);
        assert_eq!(matches[1].confidence, 0.0);
        assert!(matches[1].features.is_empty());

        let calls = exchange.calls();
        assert_eq!(calls[0].0, Method::Query);
        assert_eq!(calls[0].1["page_type"], json!([4]));
    }

    #[tokio::test]
    async fn test_filter_empty_is_empty_vec() {
        let exchange = Arc::new(
            ScriptedExchange::new()
                .reply(Response::result(json!({"matches": []})))
                .reply(Response::result(json!({}))),
        );
        let map = site(&exchange);
        assert!(map.filter(&Query::new()).await.unwrap().is_empty());
        assert!(map.filter(&Query::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filter_error_is_not_found() {
        let exchange = Arc::new(ScriptedExchange::new().reply(Response::error("", "map evicted")));
        let err = site(&exchange).filter(&Query::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.code(), "E_NOT_FOUND");
        assert_eq!(err.message(), "map evicted");
    }

    #[tokio::test]
    async fn test_nearest_wrong_length_sends_nothing() {
        let exchange = Arc::new(ScriptedExchange::new());
        let err = site(&exchange).nearest(&[0.5; 10], 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(exchange.call_count(), 0);
    }

    #[tokio::test]
    async fn test_nearest_keeps_service_order() {
        let exchange = Arc::new(ScriptedExchange::new().reply(Response::result(json!({
            "matches": [
                {"index": 9, "similarity": 0.2},
                {"index": 1, "similarity": 0.9}
            ]
        }))));
        let matches = site(&exchange).nearest(&[0.0; 128], 2).await.unwrap();
        let order: Vec<u32> = matches.iter().map(|m| m.index).collect();
        assert_eq!(order, vec![9, 1]);
        assert_eq!(matches[1].similarity, Some(0.9));
        assert_eq!(exchange.calls()[0].1["mode"], "nearest");
    }

    #[tokio::test]
    async fn test_pathfind_found() {
        let exchange = Arc::new(ScriptedExchange::new().reply(Response::result(json!({
            "nodes": [0, 4, 10],
            "total_weight": 2.5,
            "hops": 2,
            "required_actions": [{"at_node": 4, "opcode": [2, 0]}]
        }))));
        let path = site(&exchange)
            .pathfind(0, 10, &PathOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path.nodes, vec![0, 4, 10]);
        assert_eq!(path.hops, 2);
        assert_eq!(path.total_weight, 2.5);
        assert_eq!(path.required_actions[0].opcode, Opcode::new(2, 0));
    }

    #[tokio::test]
    async fn test_pathfind_no_path_is_none() {
        let exchange = Arc::new(
            ScriptedExchange::new().reply(Response::error("E_NO_PATH", "unreachable")),
        );
        let path = site(&exchange).pathfind(0, 99, &PathOptions::default()).await.unwrap();
        assert!(path.is_none());
    }

    #[tokio::test]
    async fn test_pathfind_other_error_is_path_error() {
        let exchange = Arc::new(
            ScriptedExchange::new()
                .reply(Response::error("E_GRAPH_CORRUPT", "bad edge table"))
                .reply(Response::error("", "")),
        );
        let map = site(&exchange);

        let err = map.pathfind(0, 1, &PathOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Path);
        assert_eq!(err.code(), "E_GRAPH_CORRUPT");

        let err = map.pathfind(0, 1, &PathOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), "E_PATH_FAILED");
    }

    #[tokio::test]
    async fn test_refresh() {
        let exchange = Arc::new(ScriptedExchange::new().reply(Response::result(json!({
            "updated_count": 3,
            "changed_nodes": [1, 2]
        }))));
        let result = site(&exchange)
            .refresh(&RefreshSelector::nodes(vec![1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(result.updated_count, 3);
        assert_eq!(result.changed_nodes, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_refresh_error_is_action() {
        let exchange =
            Arc::new(ScriptedExchange::new().reply(Response::error("E_RENDER", "browser died")));
        let err = site(&exchange).refresh(&RefreshSelector::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Action);
        assert_eq!(err.code(), "E_RENDER");
    }

    #[tokio::test]
    async fn test_act_unsuccessful_is_ok() {
        let exchange =
            Arc::new(ScriptedExchange::new().reply(Response::result(json!({"success": false}))));
        let result = site(&exchange).act(5, Opcode::new(2, 0), None, None).await.unwrap();
        assert!(!result.success);
        assert!(result.new_url.is_none());
    }

    #[tokio::test]
    async fn test_act_error() {
        let exchange = Arc::new(ScriptedExchange::new().reply(Response::error("", "element gone")));
        let err = site(&exchange).act(5, Opcode::new(2, 0), None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Action);
        assert_eq!(err.code(), "E_ACT_FAILED");
    }

    #[tokio::test]
    async fn test_watch_registers_and_ends() {
        let exchange = Arc::new(ScriptedExchange::new().reply(Response::result(json!({}))));
        let deltas: Vec<WatchDelta> = site(&exchange)
            .watch(&WatchSpec::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert!(deltas.is_empty());
        assert_eq!(exchange.calls()[0].0, Method::Watch);
    }

    #[tokio::test]
    async fn test_channel_failure_propagates() {
        let exchange = Arc::new(
            ScriptedExchange::new().fail(Error::timeout("E_RECV_TIMEOUT", "slow")),
        );
        let err = site(&exchange).filter(&Query::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_display() {
        let exchange = Arc::new(ScriptedExchange::new());
        assert_eq!(
            site(&exchange).to_string(),
            "SiteMap(domain=\"example.com\", nodes=42, edges=97)"
        );
    }
}
