//! Client library for the cartograph site-mapping service
//!
//! The service crawls a domain into a graph of typed, feature-encoded pages
//! and answers queries over it. This crate talks to it over a local Unix
//! socket using newline-delimited JSON:
//!
//! - [`Cartograph`] is the entry point: map domains, perceive single pages,
//!   log in, compare sites.
//! - [`SiteMap`] navigates one mapped domain: filter, nearest-neighbour,
//!   pathfinding, refresh, actions, watch registration.
//! - [`Transport`] owns the persistent channel. It connects lazily, bounds
//!   every step by the endpoint timeout and reconnects once when the channel
//!   breaks mid-write.
//!
//! Nothing here reads the environment implicitly. Use
//! [`ClientConfig::load`] to resolve settings from the config file and
//! `CARTOGRAPH_*` variables.

mod client;
pub mod codec;
mod compare;
mod config;
mod error;
pub mod lifecycle;
mod model;
mod sitemap;
#[cfg(test)]
mod testing;
mod transport;

pub use client::Cartograph;
pub use codec::{
    normalize_domain, Credentials, Domain, FeatureOp, MapOptions, Minimize, PageTypeFilter,
    PathOptions, Query, RefreshSelector, SortBy, SortDirection, WatchSpec,
};
pub use compare::CompareResult;
pub use config::{default_socket_path, ClientConfig, Endpoint, SOCKET_ENV, TIMEOUT_ENV};
pub use error::{Error, ErrorKind, Result};
pub use model::{
    page_type_name, ActResult, Features, HandshakeResult, MapInfo, NodeMatch, Opcode, PageResult,
    Path, PathAction, PoolStatus, RefreshResult, RuntimeStatus, Session, WatchDelta, FEATURE_DIM,
};
pub use sitemap::SiteMap;
pub use transport::{Connector, Exchange, Transport, UnixConnector};

pub use cartograph_protocol::{codes, Method, Response, ServiceError, PROTOCOL_VERSION};
