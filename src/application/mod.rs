pub mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorSettings};
