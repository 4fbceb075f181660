//! Smooth weighted round robin.
//!
//! Each address is picked in proportion to its weight, and picks of heavily
//! weighted addresses are interleaved with picks of lightly weighted ones
//! rather than arriving in bursts. For weights `{a: 5, b: 1, c: 1}`, the
//! sequence of picks is `a a b a c a a` rather than `a a a a a b c`.
//!
//! Only addresses carrying a weight attribute are considered. Node state is
//! seeded from the weights on every new snapshot; nothing carries over from
//! previous pickers.

use crate::address::Address;
use crate::balancer::{self, PickResult, Picker, PickerBuildInfo, PickerBuilder, SharedPicker};
use crate::balancers::base::BaseBuilder;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const NAME: &str = "weight_round_robin";

/// Returns a builder for the smooth weighted round robin strategy.
pub fn builder() -> balancer::SharedBuilder {
    Arc::new(BaseBuilder::new(NAME, Arc::new(WeightedPickerBuilder)))
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Node {
    addr: String,
    weight: i64,
    current_weight: i64,
    effective_weight: i64,
}

/// The bookkeeping for smooth weighted round robin.
#[derive(Clone, Debug, Default)]
pub struct SmoothWeighted {
    nodes: Vec<Node>,
}

impl SmoothWeighted {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, addr: impl ToString, weight: u32) {
        let weight = i64::from(weight);
        self.nodes.push(Node {
            addr: addr.to_string(),
            weight,
            current_weight: 0,
            effective_weight: weight,
        });
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the next address to use, or `None` if there are no nodes.
    pub fn next(&mut self) -> Option<&str> {
        let mut total = 0;
        let mut best: Option<(usize, i64)> = None;
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            total += node.effective_weight;
            node.current_weight += node.effective_weight;
            if node.effective_weight < node.weight {
                node.effective_weight += 1;
            }
            // Strictly greater: ties go to the node seen first.
            match best {
                Some((_, best_weight)) if node.current_weight <= best_weight => (),
                _ => best = Some((idx, node.current_weight)),
            }
        }
        let (idx, _) = best?;
        let best = &mut self.nodes[idx];
        best.current_weight -= total;
        Some(best.addr.as_str())
    }
}

struct WeightedPickerBuilder;

impl PickerBuilder for WeightedPickerBuilder {
    fn build(&self, info: PickerBuildInfo) -> SharedPicker {
        Arc::new(WeightedPicker::new(info.ready_addresses))
    }
}

/// Picks addresses in proportion to their weight attribute.
#[derive(Debug)]
pub struct WeightedPicker {
    ready: HashMap<String, Address>,
    weighted: Mutex<SmoothWeighted>,
}

impl WeightedPicker {
    pub fn new(ready_addresses: Vec<Address>) -> Self {
        let mut weighted = SmoothWeighted::new();
        let mut ready = HashMap::with_capacity(ready_addresses.len());
        for address in ready_addresses {
            if let Some(weight) = address.attributes.weight() {
                weighted.add(&address.addr, weight);
            }
            ready.insert(address.addr.clone(), address);
        }
        Self {
            ready,
            weighted: Mutex::new(weighted),
        }
    }
}

impl Picker for WeightedPicker {
    fn pick(&self) -> Result<PickResult, balancer::Error> {
        let mut weighted = self.weighted.lock().unwrap();
        let addr = weighted.next().ok_or(balancer::Error::NoAddressAvailable)?;
        let address = self
            .ready
            .get(addr)
            .cloned()
            .unwrap_or_else(|| Address::new(addr));
        Ok(PickResult::new(address))
    }
}
