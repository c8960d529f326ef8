//! Wire payloads sent upstream: state reports and acknowledgement echoes.

pub mod ack;
pub mod filter;
pub mod report;

pub use ack::{build_ack, ACK_STATUS_OK};
pub use filter::should_transmit;
pub use report::{
    build_report, build_report_for, InstallResult, StepResult, StepResults, UpdateReport,
    WorkflowRef,
};

/// Upstream writer for reported properties. Returns false when the write failed.
pub trait Reporter: Send {
    fn report_json(&self, payload: &str) -> bool;
}
