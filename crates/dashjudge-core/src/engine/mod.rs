pub mod runner;

pub use runner::{average_valid, JudgeDefaults, Orchestrator, RunRequest, RunSettings};
