pub mod compare;
pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod model;
pub mod provision;
pub mod report;
pub mod scenario;
pub mod storage;
