pub mod artifacts;
pub mod batch;
pub mod config;
pub mod error;
pub mod types;

pub use artifacts::ArtifactStore;
pub use batch::{run_units, Attempt, BatchOutcome, BatchPolicy, FailedUnit};
pub use config::Config;
pub use error::HemlockError;
pub use types::*;
