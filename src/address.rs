//! Addresses of backend instances, and the snapshots resolvers publish.

use std::collections::BTreeMap;

/// Typed metadata attached to an [Address] or a [State].
///
/// Balancing strategies read the attributes they understand (for example,
/// [Attributes::weight] for weighted round robin). Transports may attach
/// their own string metadata, which this crate carries but never interprets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Attributes {
    weight: Option<u32>,
    metadata: BTreeMap<String, String>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// The relative weight of an address, if one is known.
    pub fn weight(&self) -> Option<u32> {
        self.weight
    }

    pub fn set_weight(&mut self, weight: u32) {
        self.weight = Some(weight);
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.set_weight(weight);
        self
    }

    /// Looks up transport-specific metadata.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn insert_metadata(&mut self, key: impl ToString, value: impl ToString) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    pub fn with_metadata(mut self, key: impl ToString, value: impl ToString) -> Self {
        self.insert_metadata(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.weight.is_none() && self.metadata.is_empty()
    }
}

/// A single instance of a service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Address {
    /// The address a transport should dial, usually "host:port".
    pub addr: String,

    /// If non-empty, the name the transport should expect the server to
    /// present, instead of the host from the dialed address.
    pub server_name: String,

    pub attributes: Attributes,
}

impl Address {
    pub fn new(addr: impl ToString) -> Self {
        Self {
            addr: addr.to_string(),
            ..Default::default()
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.attributes.set_weight(weight);
        self
    }

    pub fn with_server_name(mut self, server_name: impl ToString) -> Self {
        self.server_name = server_name.to_string();
        self
    }
}

impl From<String> for Address {
    fn from(addr: String) -> Self {
        Self::new(addr)
    }
}

impl From<&'_ str> for Address {
    fn from(addr: &'_ str) -> Self {
        Self::new(addr)
    }
}

/// A full snapshot of a target's addresses, as published by a resolver.
///
/// Each state replaces the previous one; states are never merged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct State {
    pub addresses: Vec<Address>,
    pub attributes: Attributes,
}

impl State {
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
            attributes: Attributes::default(),
        }
    }
}
