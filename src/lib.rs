pub mod cli;
pub mod config;
pub mod cycle;
pub mod deps;
pub mod flock;
pub mod get;
pub mod git;
pub mod graph;
pub mod model;
pub mod patch;
pub mod resolver;

mod api;

#[cfg(test)]
mod testing;

pub use api::{Modweave, ModweaveBuilder};
