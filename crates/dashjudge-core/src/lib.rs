pub mod config;
pub mod engine;
pub mod errors;
pub mod extract;
pub mod fingerprint;
pub mod judge;
pub mod model;
pub mod providers;
pub mod repair;
pub mod report;
pub mod storage;
