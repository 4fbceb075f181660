//! A [Balancer] which delegates all strategy to a [PickerBuilder].
//!
//! Most strategies only need to decide how to pick from a list of ready
//! addresses; [BaseBuilder] turns such a [PickerBuilder] into a full
//! [balancer::Builder]. This module also provides the simplest strategy,
//! [PASS_THROUGH], which always picks the first ready address.

use crate::address::{Address, State};
use crate::balancer::{
    self, Balancer, BoxedBalancer, PickResult, Picker, PickerBuildInfo, PickerBuilder,
    SharedPicker, SharedPickerBuilder,
};

use std::sync::Arc;

/// The name of the strategy which always picks the first ready address.
pub const PASS_THROUGH: &str = "pass_through";

/// Builds [BaseBalancer]s around a [PickerBuilder].
pub struct BaseBuilder {
    name: String,
    picker_builder: SharedPickerBuilder,
}

impl BaseBuilder {
    pub fn new(name: impl ToString, picker_builder: SharedPickerBuilder) -> Self {
        Self {
            name: name.to_string(),
            picker_builder,
        }
    }
}

impl balancer::Builder for BaseBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> BoxedBalancer {
        Box::new(BaseBalancer {
            picker_builder: self.picker_builder.clone(),
            picker: None,
        })
    }
}

/// Rebuilds a picker from scratch on every new state.
pub struct BaseBalancer {
    picker_builder: SharedPickerBuilder,
    picker: Option<SharedPicker>,
}

impl BaseBalancer {
    /// The most recently built picker, if any.
    pub fn picker(&self) -> Option<&SharedPicker> {
        self.picker.as_ref()
    }
}

impl Balancer for BaseBalancer {
    fn update_state(&mut self, state: State) -> Result<SharedPicker, balancer::Error> {
        let picker = self.picker_builder.build(PickerBuildInfo {
            ready_addresses: state.addresses,
        });
        self.picker = Some(picker.clone());
        Ok(picker)
    }

    fn close(&mut self) {
        self.picker = None;
    }
}

/// Holds the ready addresses verbatim, and always picks the first one.
#[derive(Debug)]
pub struct PassThroughPicker {
    addresses: Vec<Address>,
}

impl PassThroughPicker {
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }
}

impl Picker for PassThroughPicker {
    fn pick(&self) -> Result<PickResult, balancer::Error> {
        self.addresses
            .first()
            .cloned()
            .map(PickResult::new)
            .ok_or(balancer::Error::NoAddressAvailable)
    }
}

struct PassThroughPickerBuilder;

impl PickerBuilder for PassThroughPickerBuilder {
    fn build(&self, info: PickerBuildInfo) -> SharedPicker {
        Arc::new(PassThroughPicker {
            addresses: info.ready_addresses,
        })
    }
}

/// Returns a builder for the [PASS_THROUGH] strategy.
pub fn pass_through() -> balancer::SharedBuilder {
    Arc::new(BaseBuilder::new(
        PASS_THROUGH,
        Arc::new(PassThroughPickerBuilder),
    ))
}
