//! Result codes shared by the orchestrator, the content handlers and the
//! reported `lastInstallResult` payload.

use serde::{Deserialize, Serialize};

pub type ResultCode = i32;
pub type ExtendedResultCode = i32;

pub const RESULT_FAILURE: ResultCode = 0;
pub const RESULT_FAILURE_CANCELLED: ResultCode = -1;
pub const RESULT_SUCCESS: ResultCode = 1;

pub const RESULT_IDLE_SUCCESS: ResultCode = 200;
pub const RESULT_DEPLOYMENT_IN_PROGRESS_SUCCESS: ResultCode = 400;

pub const RESULT_DOWNLOAD_SUCCESS: ResultCode = 500;
pub const RESULT_DOWNLOAD_IN_PROGRESS: ResultCode = 501;

pub const RESULT_INSTALL_SUCCESS: ResultCode = 600;
pub const RESULT_INSTALL_IN_PROGRESS: ResultCode = 601;
pub const RESULT_INSTALL_REQUIRED_IMMEDIATE_REBOOT: ResultCode = 605;
pub const RESULT_INSTALL_REQUIRED_REBOOT: ResultCode = 606;
pub const RESULT_INSTALL_REQUIRED_IMMEDIATE_AGENT_RESTART: ResultCode = 607;
pub const RESULT_INSTALL_REQUIRED_AGENT_RESTART: ResultCode = 608;

pub const RESULT_APPLY_SUCCESS: ResultCode = 700;
pub const RESULT_APPLY_IN_PROGRESS: ResultCode = 701;
pub const RESULT_APPLY_REQUIRED_IMMEDIATE_REBOOT: ResultCode = 705;
pub const RESULT_APPLY_REQUIRED_REBOOT: ResultCode = 706;
pub const RESULT_APPLY_REQUIRED_IMMEDIATE_AGENT_RESTART: ResultCode = 707;
pub const RESULT_APPLY_REQUIRED_AGENT_RESTART: ResultCode = 708;

pub const RESULT_CANCEL_SUCCESS: ResultCode = 800;
pub const RESULT_CANCEL_UNABLE_TO_CANCEL: ResultCode = 801;

pub const RESULT_IS_INSTALLED_INSTALLED: ResultCode = 900;
pub const RESULT_IS_INSTALLED_NOT_INSTALLED: ResultCode = 901;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Facility {
    Unknown = 0x0,
    SwUpdateHandler = 0x1,
    Orchestrator = 0x2,
    WorkflowParser = 0x3,
    ContentHandler = 0x4,
    AptHandler = 0xA,
    Crypto = 0xC,
    DeliveryOptimization = 0xD,
    Errno = 0xE,
    LowerLayer = 0xF,
}

pub const fn make_extended_result_code(facility: Facility, value: u32) -> ExtendedResultCode {
    ((((facility as u32) & 0xF) << 28) | (value & 0x0FFF_FFFF)) as i32
}

pub const fn facility_of(code: ExtendedResultCode) -> u8 {
    ((code as u32) >> 28) as u8
}

pub mod erc {
    use super::{make_extended_result_code, ExtendedResultCode, Facility};

    pub const PARSE_MALFORMED_JSON: ExtendedResultCode =
        make_extended_result_code(Facility::WorkflowParser, 0x001);
    pub const PARSE_MISSING_FIELD: ExtendedResultCode =
        make_extended_result_code(Facility::WorkflowParser, 0x002);
    pub const PARSE_INVALID_FIELD: ExtendedResultCode =
        make_extended_result_code(Facility::WorkflowParser, 0x003);
    pub const PARSE_UNSUPPORTED_ACTION: ExtendedResultCode =
        make_extended_result_code(Facility::WorkflowParser, 0x004);
    pub const PARSE_MANIFEST_VALIDATION_FAILED: ExtendedResultCode =
        make_extended_result_code(Facility::WorkflowParser, 0x005);

    pub const NO_HANDLER_FOR_UPDATE_TYPE: ExtendedResultCode =
        make_extended_result_code(Facility::Orchestrator, 0x001);
    pub const SANDBOX_CREATE_FAILED: ExtendedResultCode =
        make_extended_result_code(Facility::Orchestrator, 0x002);
    pub const UNEXPECTED_IN_PROGRESS_RESULT: ExtendedResultCode =
        make_extended_result_code(Facility::Orchestrator, 0x003);
    pub const WORKER_PANICKED: ExtendedResultCode =
        make_extended_result_code(Facility::Orchestrator, 0x004);
    pub const REBOOT_REQUEST_FAILED: ExtendedResultCode =
        make_extended_result_code(Facility::Orchestrator, 0x005);
    pub const AGENT_RESTART_REQUEST_FAILED: ExtendedResultCode =
        make_extended_result_code(Facility::Orchestrator, 0x006);
    pub const NOT_INSTALLED_AFTER_RESTART: ExtendedResultCode =
        make_extended_result_code(Facility::Orchestrator, 0x007);
    pub const RESUME_STATE_UNREADABLE: ExtendedResultCode =
        make_extended_result_code(Facility::Orchestrator, 0x008);
    pub const WORKER_SPAWN_FAILED: ExtendedResultCode =
        make_extended_result_code(Facility::Orchestrator, 0x009);

    pub const STEP_HANDLER_MISSING: ExtendedResultCode =
        make_extended_result_code(Facility::ContentHandler, 0x001);
}

/// Outcome of one phase as seen by the reporting layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AducResult {
    pub result_code: ResultCode,
    pub extended_result_code: ExtendedResultCode,
}

impl AducResult {
    pub const fn new(result_code: ResultCode, extended_result_code: ExtendedResultCode) -> Self {
        Self {
            result_code,
            extended_result_code,
        }
    }

    pub const fn code(result_code: ResultCode) -> Self {
        Self::new(result_code, 0)
    }

    pub const fn failure(extended_result_code: ExtendedResultCode) -> Self {
        Self::new(RESULT_FAILURE, extended_result_code)
    }

    pub const fn cancelled() -> Self {
        Self::new(RESULT_FAILURE_CANCELLED, 0)
    }

    pub fn is_success(&self) -> bool {
        self.result_code > 0
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(
            self.result_code,
            RESULT_DOWNLOAD_IN_PROGRESS | RESULT_INSTALL_IN_PROGRESS | RESULT_APPLY_IN_PROGRESS
        )
    }

    pub fn requires_reboot(&self) -> bool {
        matches!(
            self.result_code,
            RESULT_INSTALL_REQUIRED_IMMEDIATE_REBOOT
                | RESULT_INSTALL_REQUIRED_REBOOT
                | RESULT_APPLY_REQUIRED_IMMEDIATE_REBOOT
                | RESULT_APPLY_REQUIRED_REBOOT
        )
    }

    pub fn requires_agent_restart(&self) -> bool {
        matches!(
            self.result_code,
            RESULT_INSTALL_REQUIRED_IMMEDIATE_AGENT_RESTART
                | RESULT_INSTALL_REQUIRED_AGENT_RESTART
                | RESULT_APPLY_REQUIRED_IMMEDIATE_AGENT_RESTART
                | RESULT_APPLY_REQUIRED_AGENT_RESTART
        )
    }

    /// Immediate variants stop forward progress right after the phase.
    pub fn requires_immediate_restart(&self) -> bool {
        matches!(
            self.result_code,
            RESULT_INSTALL_REQUIRED_IMMEDIATE_REBOOT
                | RESULT_INSTALL_REQUIRED_IMMEDIATE_AGENT_RESTART
                | RESULT_APPLY_REQUIRED_IMMEDIATE_REBOOT
                | RESULT_APPLY_REQUIRED_IMMEDIATE_AGENT_RESTART
        )
    }
}

impl Default for AducResult {
    fn default() -> Self {
        Self::code(RESULT_FAILURE)
    }
}

impl std::fmt::Display for AducResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (erc 0x{:08X})",
            self.result_code, self.extended_result_code as u32
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_result_codes_pack_facility_into_high_nibble() {
        let code = make_extended_result_code(Facility::Errno, 1);
        assert_eq!(code as u32, 0xE000_0001);
        assert_eq!(facility_of(code), 0xE);
    }

    #[test]
    fn success_is_any_positive_code() {
        assert!(AducResult::code(RESULT_INSTALL_REQUIRED_REBOOT).is_success());
        assert!(AducResult::code(RESULT_IS_INSTALLED_NOT_INSTALLED).is_success());
        assert!(AducResult::cancelled().is_failure());
        assert!(AducResult::failure(7).is_failure());
    }

    #[test]
    fn reboot_classification_distinguishes_immediate_variants() {
        let deferred = AducResult::code(RESULT_APPLY_REQUIRED_REBOOT);
        let immediate = AducResult::code(RESULT_INSTALL_REQUIRED_IMMEDIATE_AGENT_RESTART);
        assert!(deferred.requires_reboot());
        assert!(!deferred.requires_immediate_restart());
        assert!(immediate.requires_agent_restart());
        assert!(immediate.requires_immediate_restart());
        assert!(!AducResult::code(RESULT_APPLY_SUCCESS).requires_reboot());
    }
}
