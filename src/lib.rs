pub mod config;
pub mod handlers;
pub mod orchestration;
pub mod reporting;
pub mod result;
pub mod runtime;
pub mod shared;
pub mod workflow;
