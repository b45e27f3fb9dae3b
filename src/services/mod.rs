pub mod cache;
pub mod geo;
pub mod optimizer;
pub mod tracking;
