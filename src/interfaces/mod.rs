//! Wire adapters for services reached over the network.

pub mod http;
