//! waypoint is a client-side service discovery and load balancing crate.
//!
//! waypoint finds the addresses backing a logical endpoint, and hands callers
//! exactly one address per outgoing call.
//!
//! It uses the following terminology:
//! * A target names a logical endpoint, as `scheme://agent/endpoint`. Targets
//!   without a scheme name an address which is dialed directly.
//! * Resolvers watch something (usually a naming service) for the set of
//!   addresses backing a target, and publish full snapshots of that set.
//! * Balancers turn each snapshot into a picker, which selects an address for
//!   each call according to some strategy.
//!
//! # Usage
//!
//! * The main interface for this crate is [conn::ClientConn].
//! * To construct a connection, you must supply a [registry::Registry]
//!   holding [resolver::Builder]s and [balancer::Builder]s. Use
//!   [registry::Registry::with_defaults] for the built-in strategies, and
//!   register a [resolvers::consul::ConsulResolverBuilder] with a
//!   [naming::Connector] to watch a naming service.
//!
//! # DTrace probes
//!
//! waypoint contains a number of DTrace USDT probes, which fire as addresses
//! are resolved and picked. The full list of probes is:
//!
//! - `pick-start`: Fires before picking an address for a call.
//! - `pick-done`: Fires before returning a picked address to the caller.
//! - `pick-failed`: Fires on failure to pick an address.
//! - `picker-update`: Fires after a new picker has been installed.
//! - `resolve-done`: Fires after the naming service returned a snapshot.
//! - `resolve-failed`: Fires after a naming service query failed.
//!
//! The existence of the probes is behind the `"probes"` feature, which is
//! enabled by default. Probes are zero-cost unless they are explicitly enabled,
//! by tracing the program with the `dtrace(1)` command-line tool.
//!
//! On most systems, the USDT probes must be registered with the DTrace kernel
//! module. This happens in [conn::ClientConn::new]. Registration is
//! technically fallible; a failure is logged, and the connection is usable
//! without instrumentation.

// Public API
pub mod address;
pub mod balancer;
pub mod conn;
pub mod naming;
pub mod picker;
pub mod policy;
pub mod registry;
pub mod resolver;
pub mod target;

// Necessary for implementation
mod backoff;
mod join;
#[cfg(test)]
mod test_utils;

// Default implementations of generic interfaces
pub mod balancers;
pub mod resolvers;

/// Uniquely identifies a pick
#[cfg(feature = "probes")]
#[derive(Copy, Clone, Debug)]
pub(crate) struct PickId(pub u64);

#[cfg(feature = "probes")]
impl PickId {
    fn new() -> Self {
        let id = usdt::UniqueId::new().as_u64();
        Self(id)
    }
}

/// USDT probes for tracing how waypoint resolves and picks addresses.
#[cfg(feature = "probes")]
#[usdt::provider(provider = "waypoint")]
mod probes {
    /// Fires right before picking an address for a call.
    fn pick__start(conn: &str, pick_id: u64) {}

    /// Fires when an address has been picked, with the address.
    fn pick__done(conn: &str, pick_id: u64, addr: &str) {}

    /// Fires when we _fail_ to pick an address, with a string identifying
    /// the reason.
    fn pick__failed(conn: &str, pick_id: u64, reason: &str) {}

    /// Fires when a new picker has been installed, with the number of
    /// addresses it was built from.
    fn picker__update(conn: &str, addresses: u64) {}

    /// Fires when the naming service returns a snapshot of a service.
    fn resolve__done(service: &str, addresses: u64) {}

    /// Fires when a query to the naming service fails, with a string
    /// identifying the reason.
    fn resolve__failed(service: &str, reason: &str) {}
}
