//! Implementation of [Resolver] that always returns a fixed set of addresses.
//!
//! Targets look like `fixed:///10.0.0.1:80=3,10.0.0.2:80`: a comma-separated
//! list of addresses, each optionally followed by `=weight`.

use crate::address::{Address, State};
use crate::resolver::{self, BoxedResolver, Resolver, SharedStateSink};
use crate::target::Target;

use tracing::{event, Level};

/// The scheme of targets which list their addresses inline.
pub const SCHEME: &str = "fixed";

/// A [`Resolver`] that always returns a fixed set of addresses.
pub struct FixedResolver {
    state: State,
    sink: SharedStateSink,
}

impl FixedResolver {
    /// Publishes `addrs` to `sink` immediately, and again on every call to
    /// [Resolver::resolve_now].
    pub fn new(addrs: impl IntoIterator<Item = Address>, sink: SharedStateSink) -> FixedResolver {
        let resolver = FixedResolver {
            state: State::new(addrs),
            sink,
        };
        resolver.publish();
        resolver
    }

    fn publish(&self) {
        event!(
            Level::DEBUG,
            count = self.state.addresses.len(),
            "Publishing fixed addresses"
        );
        if let Err(err) = self.sink.update_state(self.state.clone()) {
            self.sink.report_error(err);
        }
    }
}

impl Resolver for FixedResolver {
    fn resolve_now(&self) {
        self.publish();
    }
}

/// Parses the endpoint of a `fixed` target into addresses.
pub fn parse_addresses(target: &Target) -> Result<Vec<Address>, resolver::Error> {
    let invalid = |reason: String| resolver::Error::InvalidTarget {
        target: target.to_string(),
        reason,
    };

    let mut addresses = vec![];
    for item in target.endpoint.split(',').map(str::trim) {
        if item.is_empty() {
            continue;
        }
        let address = match item.rsplit_once('=') {
            Some((addr, weight)) => {
                let weight = weight
                    .parse()
                    .map_err(|_| invalid(format!("bad weight {weight:?} for {addr:?}")))?;
                Address::new(addr).with_weight(weight)
            }
            None => Address::new(item),
        };
        if address.addr.is_empty() {
            return Err(invalid(format!("empty address in {item:?}")));
        }
        addresses.push(address);
    }
    if addresses.is_empty() {
        return Err(invalid("no addresses".to_string()));
    }
    Ok(addresses)
}

/// Builds [FixedResolver]s for targets with the [SCHEME] scheme.
#[derive(Clone, Debug, Default)]
pub struct FixedResolverBuilder;

impl resolver::Builder for FixedResolverBuilder {
    fn scheme(&self) -> &str {
        SCHEME
    }

    fn build(
        &self,
        target: &Target,
        sink: SharedStateSink,
    ) -> Result<BoxedResolver, resolver::Error> {
        let addresses = parse_addresses(target)?;
        Ok(Box::new(FixedResolver::new(addresses, sink)))
    }
}
