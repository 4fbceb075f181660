//! Default implementations of the balancer interface

pub mod base;
pub mod round_robin;
pub mod weighted;
