pub mod error;
pub mod fetcher;
pub mod gate;
pub mod manifest;
pub mod orchestrator;
pub mod process;
pub mod stages;
#[cfg(test)]
pub mod testing;

pub use orchestrator::{Orchestrator, RunReport};
