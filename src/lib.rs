//! Client deprecation collection: an in-page aggregator that batches
//! deprecation counts into best-effort beacons, and the sink that turns those
//! beacons into bounded Prometheus counters.

pub mod collector;
pub mod config;
pub mod ops;
pub mod sink;
