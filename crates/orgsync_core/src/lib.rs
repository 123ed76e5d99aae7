pub mod config;
pub mod details;
pub mod error;
pub mod hierarchy;
pub mod http;
pub mod lookup;
pub mod model;
pub mod prune;
pub mod reconcile;
pub mod registry;
pub mod runtime;
pub mod snapshot;
pub mod template;
pub mod units;
pub mod update;
pub mod wiki;

#[cfg(test)]
mod testing;
