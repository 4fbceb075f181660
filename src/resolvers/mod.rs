//! Default implementations of [crate::resolver::Resolver]

pub mod consul;
pub mod fixed;
