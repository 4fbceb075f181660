//! The interface for the resolver, which finds addresses for a target.

use crate::address::State;
use crate::naming;
use crate::target::Target;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{event, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Couldn't connect to the naming service")]
    Connect(#[from] naming::Error),

    #[error(transparent)]
    Other(anyhow::Error),
}

/// The consumer of a resolver's output.
///
/// Resolvers push full snapshots of the addresses they've found; each
/// snapshot replaces the previous one.
pub trait StateSink: Send + Sync {
    /// Replaces the set of addresses known for the target.
    fn update_state(&self, state: State) -> Result<(), Error>;

    /// Notifies the consumer that the resolver encountered an error.
    ///
    /// By default, the error is logged.
    fn report_error(&self, err: Error) {
        event!(Level::WARN, ?err, "Resolver reported an error");
    }
}

pub type SharedStateSink = Arc<dyn StateSink>;

/// Watches for the set of addresses backing a target.
///
/// The resolver is responsible for reporting the set of all addresses to its
/// [StateSink], but not for tracking their health beyond what the naming
/// service itself reports.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Asks the resolver to look up addresses again, as soon as it can.
    ///
    /// This is a hint, and may be ignored. By default this method does
    /// nothing.
    fn resolve_now(&self) {}

    /// Cleanly terminates the resolver.
    ///
    /// This ensures that background tasks, if they exist, have stopped.
    async fn close(&mut self) {}
}

/// Helper type for anything that implements the Resolver interface.
pub type BoxedResolver = Box<dyn Resolver>;

/// Constructs resolvers for targets with a particular scheme.
pub trait Builder: Send + Sync {
    /// The scheme of targets this builder understands.
    fn scheme(&self) -> &str;

    /// Starts a resolver for `target`, which publishes to `sink`.
    fn build(&self, target: &Target, sink: SharedStateSink) -> Result<BoxedResolver, Error>;
}

pub type SharedBuilder = Arc<dyn Builder>;

/// A mapping from scheme to resolver [Builder].
///
/// Scheme names are matched exactly.
#[derive(Default)]
pub struct Registry {
    builders: RwLock<HashMap<String, SharedBuilder>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a builder for its scheme, replacing any builder previously
    /// registered for the same scheme.
    pub fn register(&self, builder: SharedBuilder) {
        let scheme = builder.scheme().to_string();
        self.builders.write().unwrap().insert(scheme, builder);
    }

    /// Returns the builder registered for `scheme`, if any.
    pub fn get(&self, scheme: &str) -> Option<SharedBuilder> {
        self.builders.read().unwrap().get(scheme).cloned()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let builders = self.builders.read().unwrap();
        f.debug_set().entries(builders.keys()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct NamedBuilder {
        scheme: &'static str,
        id: usize,
    }

    struct NopResolver;

    impl Resolver for NopResolver {}

    impl Builder for NamedBuilder {
        fn scheme(&self) -> &str {
            self.scheme
        }

        fn build(&self, target: &Target, _sink: SharedStateSink) -> Result<BoxedResolver, Error> {
            if target.endpoint.is_empty() {
                return Err(Error::InvalidTarget {
                    target: target.to_string(),
                    reason: format!("builder {} needs an endpoint", self.id),
                });
            }
            Ok(Box::new(NopResolver))
        }
    }

    #[test]
    fn lookup_unknown_scheme() {
        let registry = Registry::new();
        assert!(registry.get("consul").is_none());
    }

    #[test]
    fn last_registration_wins() {
        let registry = Registry::new();
        registry.register(Arc::new(NamedBuilder {
            scheme: "consul",
            id: 1,
        }));
        registry.register(Arc::new(NamedBuilder {
            scheme: "consul",
            id: 2,
        }));

        let builder = registry.get("consul").expect("Builder should be registered");
        assert_eq!(builder.scheme(), "consul");

        struct Discard;
        impl StateSink for Discard {
            fn update_state(&self, _state: State) -> Result<(), Error> {
                Ok(())
            }
        }
        let err = builder
            .build(&Target::parse("consul://agent/"), Arc::new(Discard))
            .err()
            .expect("Empty endpoint should be rejected");
        assert!(err.to_string().contains("builder 2"), "{err}");
    }

    #[test]
    fn schemes_are_case_sensitive() {
        let registry = Registry::new();
        registry.register(Arc::new(NamedBuilder {
            scheme: "consul",
            id: 1,
        }));
        assert!(registry.get("consul").is_some());
        assert!(registry.get("Consul").is_none());
    }
}
