use crate::orchestration::WorkflowData;
use crate::result::{AducResult, ExtendedResultCode, ResultCode};
use crate::workflow::{NodeId, UpdateAction, UpdateState, WorkflowTree};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport<'a> {
    pub state: UpdateState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowRef<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_update_id: Option<&'a str>,
    pub last_install_result: InstallResult<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRef<'a> {
    pub action: UpdateAction,
    pub id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_timestamp: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult<'a> {
    pub result_code: ResultCode,
    pub extended_result_code: ExtendedResultCode,
    pub result_details: Option<&'a str>,
    #[serde(skip_serializing_if = "StepResults::is_omitted")]
    pub step_results: StepResults<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult<'a> {
    pub result_code: ResultCode,
    pub extended_result_code: ExtendedResultCode,
    pub result_details: Option<&'a str>,
}

/// `stepResults` is either absent, explicitly null, or a map in step order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResults<'a> {
    Omitted,
    Cleared,
    Populated(Vec<(String, StepResult<'a>)>),
}

impl StepResults<'_> {
    pub fn is_omitted(&self) -> bool {
        matches!(self, Self::Omitted)
    }
}

impl Serialize for StepResults<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Omitted | Self::Cleared => serializer.serialize_none(),
            Self::Populated(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

/// Builds the reported payload for `state` from the current orchestrator state.
///
/// The result comes from `result` when given, otherwise from the current
/// tree. The output depends only on the inputs, with a fixed field order.
pub fn build_report(
    data: &WorkflowData,
    state: UpdateState,
    result: Option<&AducResult>,
    installed_update_id: Option<&str>,
) -> Result<String, serde_json::Error> {
    build_report_for(
        data.current.as_ref(),
        data.current_action,
        state,
        result,
        None,
        installed_update_id,
    )
}

/// Same as [`build_report`] over an explicit tree, with optional details that
/// take precedence over the tree's own result details.
pub fn build_report_for(
    tree: Option<&WorkflowTree>,
    current_action: Option<UpdateAction>,
    state: UpdateState,
    result: Option<&AducResult>,
    details: Option<&str>,
    installed_update_id: Option<&str>,
) -> Result<String, serde_json::Error> {
    let root_result = result
        .copied()
        .or_else(|| tree.map(WorkflowTree::result))
        .unwrap_or_default();
    let result_details = details.or_else(|| tree.and_then(WorkflowTree::result_details));

    let workflow = tree.map(|tree| WorkflowRef {
        action: current_action.unwrap_or_else(|| tree.action()),
        id: tree.workflow_id().as_str(),
        retry_timestamp: tree.retry_timestamp(),
    });

    let report = UpdateReport {
        state,
        workflow,
        installed_update_id,
        last_install_result: InstallResult {
            result_code: root_result.result_code,
            extended_result_code: root_result.extended_result_code,
            result_details,
            step_results: step_results(tree, state),
        },
    };
    serde_json::to_string(&report)
}

fn step_results(tree: Option<&WorkflowTree>, state: UpdateState) -> StepResults<'_> {
    if matches!(
        state,
        UpdateState::DownloadStarted | UpdateState::DeploymentInProgress
    ) {
        return StepResults::Cleared;
    }
    let Some(tree) = tree else {
        return StepResults::Omitted;
    };

    let entries: Vec<_> = tree
        .children(NodeId::ROOT)
        .enumerate()
        .filter_map(|(index, child)| {
            child.result.map(|result| {
                (
                    format!("step_{index}"),
                    StepResult {
                        result_code: result.result_code,
                        extended_result_code: result.extended_result_code,
                        result_details: child.result_details.as_deref(),
                    },
                )
            })
        })
        .collect();
    if entries.is_empty() {
        StepResults::Omitted
    } else {
        StepResults::Populated(entries)
    }
}
