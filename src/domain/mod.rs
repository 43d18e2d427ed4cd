//! Domain layer: value types, invariants, and the ports the application drives.

pub mod allocation;
pub mod entity;
pub mod launch;
pub mod payment;
pub mod pool;
pub mod ports;
pub mod primitives;
pub mod strategy;
