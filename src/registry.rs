//! The set of resolvers and balancers available to client connections.

use crate::balancer;
use crate::balancers::{base, round_robin, weighted};
use crate::resolver;
use crate::resolvers::fixed::FixedResolverBuilder;

use std::sync::Arc;

/// Resolver builders by scheme, and balancer builders by name.
///
/// Populate a registry once at startup, then share it between every
/// [crate::conn::ClientConn] constructed from it.
#[derive(Debug, Default)]
pub struct Registry {
    pub resolvers: resolver::Registry,
    pub balancers: balancer::Registry,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in strategies and the `fixed`
    /// resolver.
    ///
    /// Resolvers backed by a naming service need a [crate::naming::Connector],
    /// and must be registered by the application.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.balancers.register(base::pass_through());
        registry.balancers.register(round_robin::builder());
        registry.balancers.register(weighted::builder());
        registry.resolvers.register(Arc::new(FixedResolverBuilder));
        registry
    }

    pub fn register_resolver(&self, builder: resolver::SharedBuilder) {
        self.resolvers.register(builder);
    }

    pub fn register_balancer(&self, builder: balancer::SharedBuilder) {
        self.balancers.register(builder);
    }

    pub fn resolver(&self, scheme: &str) -> Option<resolver::SharedBuilder> {
        self.resolvers.get(scheme)
    }

    pub fn balancer(&self, name: &str) -> Option<balancer::SharedBuilder> {
        self.balancers.get(name)
    }
}
