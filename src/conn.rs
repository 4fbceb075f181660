//! Client connections: the glue between a resolver, a balancer, and the
//! callers picking addresses.

use crate::address::{Address, State};
use crate::balancer::BoxedBalancer;
use crate::balancers::round_robin;
use crate::picker::{self, PickerWrapper};
use crate::policy::Policy;
#[cfg(feature = "probes")]
use crate::probes;
use crate::registry::Registry;
use crate::resolver::{self, BoxedResolver, StateSink};
use crate::target::Target;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Resolver not found for scheme {0:?}")]
    ResolverNotExist(String),

    #[error("Balancer not found for name {0:?}")]
    BalancerNotExist(String),

    #[error("Couldn't start resolver")]
    Resolver(#[from] resolver::Error),

    #[error(transparent)]
    Pick(#[from] picker::Error),
}

impl Error {
    /// Returns true if this error was caused by the caller cancelling
    /// the pick.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Pick(picker::Error::Canceled { .. }))
    }
}

/// Feeds each state a resolver publishes through the balancer, and
/// installs the resulting picker.
struct BalancerWrapper {
    name: String,

    // Serializes rebuilds, so an older picker can never be installed after a
    // newer one. None once closed.
    balancer: Mutex<Option<BoxedBalancer>>,
    pickers: Arc<PickerWrapper>,
}

impl BalancerWrapper {
    fn new(name: String, balancer: BoxedBalancer, pickers: Arc<PickerWrapper>) -> Self {
        Self {
            name,
            balancer: Mutex::new(Some(balancer)),
            pickers,
        }
    }

    fn close(&self) {
        if let Some(mut balancer) = self.balancer.lock().unwrap().take() {
            balancer.close();
        }
    }
}

impl StateSink for BalancerWrapper {
    fn update_state(&self, state: State) -> Result<(), resolver::Error> {
        let mut balancer = self.balancer.lock().unwrap();
        let Some(balancer) = balancer.as_mut() else {
            event!(Level::DEBUG, conn = %self.name, "Ignoring state after close");
            return Ok(());
        };

        let count = state.addresses.len();
        let picker = balancer.update_state(state).map_err(|err| {
            event!(Level::ERROR, conn = %self.name, ?err, "Balancer rejected state");
            resolver::Error::Other(anyhow::Error::new(err))
        })?;
        self.pickers.update_picker(picker);

        #[cfg(feature = "probes")]
        probes::picker__update!(|| (self.name.as_str(), count as u64));
        event!(Level::DEBUG, conn = %self.name, count, "Updated picker");
        Ok(())
    }

    fn report_error(&self, err: resolver::Error) {
        event!(Level::WARN, conn = %self.name, ?err, "Resolver reported an error");
    }
}

/// Something which hands out one address per call.
///
/// This is the interface transports consume.
#[async_trait]
pub trait Pick: Send + Sync {
    /// Picks an address for one call.
    ///
    /// See [PickerWrapper::pick] for the meaning of `fail_fast`.
    async fn pick(&self, cancel: &CancellationToken, fail_fast: bool) -> Result<Address, Error>;
}

/// A connection to a logical endpoint, backed by any number of addresses.
///
/// Direct targets (those without a scheme) always pick the endpoint itself.
/// Other targets are resolved by the resolver registered for their scheme,
/// and balanced by the strategy named in the [Policy].
pub struct ClientConn {
    name: String,
    target: Target,
    pickers: Arc<PickerWrapper>,

    // None for direct targets.
    balancer: Option<Arc<BalancerWrapper>>,
    resolver: tokio::sync::Mutex<Option<BoxedResolver>>,
}

impl ClientConn {
    /// Creates a new connection to `target`.
    ///
    /// Fails if the target's scheme or the policy's balancer are unknown,
    /// or if the resolver rejects the target.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip(policy, registry), name = "ClientConn::new")]
    pub fn new(target: &str, policy: Policy, registry: &Registry) -> Result<Self, Error> {
        let name = policy.name.clone().unwrap_or_else(|| target.to_string());
        let target = Target::parse(target);

        #[cfg(feature = "probes")]
        if let Err(err) = usdt::register_probes() {
            event!(Level::WARN, ?err, "Failed to register probes");
        }

        if target.is_pass_through() {
            event!(Level::INFO, conn = %name, "Dialing target directly");
            return Ok(Self {
                name,
                target,
                pickers: Arc::new(PickerWrapper::new()),
                balancer: None,
                resolver: tokio::sync::Mutex::new(None),
            });
        }

        let balancer_name = if policy.balancer.is_empty() {
            round_robin::NAME
        } else {
            policy.balancer.as_str()
        };
        let balancer_builder = registry
            .balancer(balancer_name)
            .ok_or_else(|| Error::BalancerNotExist(balancer_name.to_string()))?;
        let resolver_builder = policy
            .resolver(&target.scheme)
            .or_else(|| registry.resolver(&target.scheme))
            .ok_or_else(|| Error::ResolverNotExist(target.scheme.clone()))?;

        let pickers = Arc::new(PickerWrapper::new());
        let balancer = Arc::new(BalancerWrapper::new(
            name.clone(),
            balancer_builder.build(),
            pickers.clone(),
        ));
        let resolver = resolver_builder.build(&target, balancer.clone())?;

        event!(
            Level::INFO,
            conn = %name,
            scheme = %target.scheme,
            balancer = balancer_name,
            "Created client connection"
        );
        Ok(Self {
            name,
            target,
            pickers,
            balancer: Some(balancer),
            resolver: tokio::sync::Mutex::new(Some(resolver)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Returns true if this connection dials its target without resolving it.
    pub fn is_direct(&self) -> bool {
        self.balancer.is_none()
    }

    /// Picks an address for one call.
    #[instrument(level = "debug", skip(self, cancel), err, name = "ClientConn::pick")]
    pub async fn pick(
        &self,
        cancel: &CancellationToken,
        fail_fast: bool,
    ) -> Result<Address, Error> {
        #[cfg(feature = "probes")]
        let id = crate::PickId::new();
        #[cfg(feature = "probes")]
        probes::pick__start!(|| (self.name.as_str(), id.0));
        let res = self.do_pick(cancel, fail_fast).await;
        #[cfg(feature = "probes")]
        match &res {
            Ok(address) => {
                probes::pick__done!(|| (self.name.as_str(), id.0, address.addr.as_str()))
            }
            Err(err) => {
                probes::pick__failed!(|| (self.name.as_str(), id.0, err.to_string()))
            }
        }
        res
    }

    async fn do_pick(
        &self,
        cancel: &CancellationToken,
        fail_fast: bool,
    ) -> Result<Address, Error> {
        if self.is_direct() {
            if self.pickers.is_closed() {
                return Err(picker::Error::Closed.into());
            }
            return Ok(Address::new(&self.target.endpoint));
        }
        Ok(self.pickers.pick(cancel, fail_fast).await?)
    }

    /// Replaces the set of addresses, as if the resolver had published it.
    ///
    /// Does nothing for direct connections.
    pub fn update_state(&self, state: State) -> Result<(), Error> {
        let Some(balancer) = &self.balancer else {
            return Ok(());
        };
        Ok(balancer.update_state(state)?)
    }

    /// Asks the resolver to look up addresses again, as soon as it can.
    pub async fn resolve_now(&self) {
        if let Some(resolver) = self.resolver.lock().await.as_ref() {
            resolver.resolve_now();
        }
    }

    /// Stops resolving, and fails every pending and future pick.
    ///
    /// Calling this more than once is harmless.
    pub async fn close(&self) {
        let resolver = self.resolver.lock().await.take();
        if let Some(mut resolver) = resolver {
            resolver.close().await;
        }
        if let Some(balancer) = &self.balancer {
            balancer.close();
        }
        self.pickers.close();
        event!(Level::INFO, conn = %self.name, "Closed client connection");
    }
}

#[async_trait]
impl Pick for ClientConn {
    async fn pick(&self, cancel: &CancellationToken, fail_fast: bool) -> Result<Address, Error> {
        ClientConn::pick(self, cancel, fail_fast).await
    }
}
