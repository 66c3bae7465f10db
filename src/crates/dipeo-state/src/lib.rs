//! # dipeo-state - execution state store
//!
//! Per-execution state: a live cache for running executions plus a durable
//! repository written at terminal transitions. The state store exclusively
//! owns mutation; the scheduler and observers call through [`StateService`].

pub mod cache;
pub mod disk;
pub mod error;
pub mod memory;
pub mod ports;
pub mod service;

pub use cache::{LiveExecutionCache, DEFAULT_MAX_LIVE};
pub use disk::JsonFileStateRepository;
pub use error::{Result, StateError};
pub use memory::InMemoryStateRepository;
pub use ports::{ExecutionCache, ExecutionFilter, StateRepository};
pub use service::StateService;
