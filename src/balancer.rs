//! The interface for balancers, which turn address snapshots into pickers.

use crate::address::{Address, State};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No address is available")]
    NoAddressAvailable,

    #[error(transparent)]
    Other(anyhow::Error),
}

/// How the use of a picked address turned out.
#[derive(Debug)]
pub enum Outcome {
    Success,
    Failure(anyhow::Error),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Receives the outcome of a pick, once the address has been used.
pub trait Feedback: Send + Sync {
    fn done(&self, outcome: Outcome);
}

/// The address chosen for a single call.
#[derive(Clone)]
pub struct PickResult {
    pub address: Address,

    /// Notified when the pick has been consumed, if present.
    pub feedback: Option<Arc<dyn Feedback>>,
}

impl PickResult {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            feedback: None,
        }
    }
}

impl std::fmt::Debug for PickResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PickResult")
            .field("address", &self.address)
            .field("feedback", &self.feedback.is_some())
            .finish()
    }
}

/// Selects an address for each call.
///
/// A picker is built from one snapshot of addresses, and never observes
/// later snapshots: a new picker is built instead.
pub trait Picker: Send + Sync {
    fn pick(&self) -> Result<PickResult, Error>;
}

pub type SharedPicker = Arc<dyn Picker>;

/// Information available when building a picker.
#[derive(Clone, Debug, Default)]
pub struct PickerBuildInfo {
    pub ready_addresses: Vec<Address>,
}

/// Creates pickers for a particular strategy.
pub trait PickerBuilder: Send + Sync {
    fn build(&self, info: PickerBuildInfo) -> SharedPicker;
}

pub type SharedPickerBuilder = Arc<dyn PickerBuilder>;

/// Turns resolver output into pickers.
pub trait Balancer: Send {
    /// Builds a picker for a new snapshot of addresses.
    fn update_state(&mut self, state: State) -> Result<SharedPicker, Error>;

    /// Releases any resources held by the balancer.
    ///
    /// By default this method does nothing.
    fn close(&mut self) {}
}

pub type BoxedBalancer = Box<dyn Balancer>;

/// Constructs balancers of a named strategy.
pub trait Builder: Send + Sync {
    fn name(&self) -> &str;
    fn build(&self) -> BoxedBalancer;
}

pub type SharedBuilder = Arc<dyn Builder>;

/// A mapping from strategy name to balancer [Builder].
///
/// Names are case-insensitive.
#[derive(Default)]
pub struct Registry {
    builders: RwLock<HashMap<String, SharedBuilder>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a builder under its (lowercased) name, replacing any builder
    /// previously registered under the same name.
    pub fn register(&self, builder: SharedBuilder) {
        let name = builder.name().to_lowercase();
        self.builders.write().unwrap().insert(name, builder);
    }

    /// Returns the builder registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<SharedBuilder> {
        self.builders
            .read()
            .unwrap()
            .get(&name.to_lowercase())
            .cloned()
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
    use crate::balancers::base::BaseBuilder;
    use crate::balancers::round_robin;

    struct FirstPicker(Vec<Address>);

    impl Picker for FirstPicker {
        fn pick(&self) -> Result<PickResult, Error> {
            self.0
                .first()
                .cloned()
                .map(PickResult::new)
                .ok_or(Error::NoAddressAvailable)
        }
    }

    struct FirstPickerBuilder;

    impl PickerBuilder for FirstPickerBuilder {
        fn build(&self, info: PickerBuildInfo) -> SharedPicker {
            Arc::new(FirstPicker(info.ready_addresses))
        }
    }

    #[test]
    fn names_are_case_folded() {
        let registry = Registry::new();
        registry.register(Arc::new(BaseBuilder::new(
            "My_Strategy",
            Arc::new(FirstPickerBuilder),
        )));
        assert!(registry.get("my_strategy").is_some());
        assert!(registry.get("MY_STRATEGY").is_some());
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn last_registration_wins() {
        let registry = Registry::new();
        registry.register(round_robin::builder());
        registry.register(Arc::new(BaseBuilder::new(
            round_robin::NAME,
            Arc::new(FirstPickerBuilder),
        )));

        let mut balancer = registry
            .get(round_robin::NAME)
            .expect("Builder should be registered")
            .build();
        let picker = balancer
            .update_state(State::new(["a:1", "b:1"].map(Address::from)))
            .unwrap();

        // The replacement always picks the first address.
        for _ in 0..3 {
            assert_eq!(picker.pick().unwrap().address.addr, "a:1");
        }
    }
}
