//! The interface for naming services, which resolvers watch for changes.
//!
//! The naming service itself (for example, a Consul agent) is not implemented
//! by this crate. Applications supply a [Connector] which knows how to talk to
//! their agent, and the resolvers in [crate::resolvers] drive it.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    #[error("Naming service unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(anyhow::Error),
}

/// Describes how to reach the agent of a naming service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Agent {
    /// "host:port" of the agent. May be empty, in which case the connector
    /// should use its own default.
    pub address: String,

    /// An ACL token to present to the agent, if any.
    pub token: Option<String>,

    /// Whether the agent should be contacted over TLS.
    pub tls: bool,
}

/// Options for a single blocking query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// The index returned by the previous query. The naming service blocks
    /// until its state moves past this index, or until `wait_time` elapses.
    ///
    /// Zero means "do not block".
    pub wait_index: u64,

    /// How long the naming service may block. `None` uses the service's
    /// default.
    pub wait_time: Option<Duration>,

    pub datacenter: Option<String>,

    /// Sort results by round trip time from this node.
    pub near: Option<String>,

    pub allow_stale: bool,

    pub require_consistent: bool,
}

/// One instance of a service, as reported by the naming service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceEntry {
    /// The address the service registered. May be empty, in which case
    /// `node_address` should be used.
    pub service_address: String,

    /// The address of the node the service runs on.
    pub node_address: String,

    pub port: u16,

    /// The weight of this instance while passing health checks.
    pub weight: Option<u32>,

    /// Free-form metadata registered with the instance.
    pub meta: BTreeMap<String, String>,
}

/// Metadata describing a completed query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryMeta {
    /// The index to pass in the next blocking query.
    pub last_index: u64,

    /// How long the query took, including the time spent blocking.
    pub request_time: Duration,
}

/// A client of a naming service.
#[async_trait]
pub trait NamingService: Send + Sync {
    /// Lists the instances of `service`.
    ///
    /// This is a long-poll: if `options.wait_index` is non-zero, the call
    /// blocks until the set of instances changes or the wait time elapses.
    async fn service(
        &self,
        service: &str,
        tag: Option<&str>,
        healthy_only: bool,
        options: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, QueryMeta), Error>;
}

pub type SharedNamingService = Arc<dyn NamingService>;

/// Describes how a client of a naming service should be constructed.
pub trait Connector: Send + Sync {
    fn connect(&self, agent: &Agent) -> Result<SharedNamingService, Error>;
}

pub type SharedConnector = Arc<dyn Connector>;
