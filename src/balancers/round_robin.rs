//! Picks each ready address in turn.

use crate::address::Address;
use crate::balancer::{self, PickResult, Picker, PickerBuildInfo, PickerBuilder, SharedPicker};
use crate::balancers::base::BaseBuilder;

use std::sync::{Arc, Mutex};

pub const NAME: &str = "round_robin";

/// Returns a builder for the round robin strategy.
pub fn builder() -> balancer::SharedBuilder {
    Arc::new(BaseBuilder::new(NAME, Arc::new(RoundRobinPickerBuilder)))
}

struct RoundRobinPickerBuilder;

impl PickerBuilder for RoundRobinPickerBuilder {
    fn build(&self, info: PickerBuildInfo) -> SharedPicker {
        Arc::new(RoundRobinPicker::new(info.ready_addresses))
    }
}

/// Cycles through addresses in the order the resolver reported them.
#[derive(Debug)]
pub struct RoundRobinPicker {
    addresses: Vec<Address>,
    next: Mutex<usize>,
}

impl RoundRobinPicker {
    pub fn new(addresses: Vec<Address>) -> Self {
        Self {
            addresses,
            next: Mutex::new(0),
        }
    }
}

impl Picker for RoundRobinPicker {
    fn pick(&self) -> Result<PickResult, balancer::Error> {
        if self.addresses.is_empty() {
            return Err(balancer::Error::NoAddressAvailable);
        }
        let mut next = self.next.lock().unwrap();
        let address = self.addresses[*next].clone();
        *next = (*next + 1) % self.addresses.len();
        Ok(PickResult::new(address))
    }
}
