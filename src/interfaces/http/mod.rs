pub mod facilitator;

pub use facilitator::HttpFacilitator;
