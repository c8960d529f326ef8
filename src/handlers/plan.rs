use super::context::{CancelToken, PhaseContext};
use super::{ContentHandler, Phase};
use crate::result::{
    AducResult, RESULT_FAILURE_CANCELLED, RESULT_IS_INSTALLED_INSTALLED,
    RESULT_IS_INSTALLED_NOT_INSTALLED,
};
use crate::workflow::{NodeId, UpdateType, WorkflowTree};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct PhaseTarget {
    pub node: NodeId,
    pub update_type: UpdateType,
    pub handler: Arc<dyn ContentHandler>,
}

impl std::fmt::Debug for PhaseTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseTarget")
            .field("node", &self.node)
            .field("update_type", &self.update_type)
            .finish()
    }
}

/// Ordered handler bindings for one tree, resolved once per deployment.
#[derive(Debug, Clone, Default)]
pub struct PhasePlan {
    targets: Vec<PhaseTarget>,
}

impl PhasePlan {
    pub fn new(targets: Vec<PhaseTarget>) -> Self {
        Self { targets }
    }

    pub fn targets(&self) -> &[PhaseTarget] {
        &self.targets
    }

    /// A single target bound to the root is a plain update, not a bundle.
    pub fn is_bundle(&self) -> bool {
        !(self.targets.len() == 1 && self.targets[0].node == NodeId::ROOT)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub node: NodeId,
    pub result: AducResult,
    pub details: Option<String>,
    pub properties: Map<String, Value>,
}

/// Everything a phase produced. Applied to the live tree by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub result: AducResult,
    pub details: Option<String>,
    pub nodes: Vec<NodeOutcome>,
}

impl PhaseOutcome {
    pub fn from_result(phase: Phase, result: AducResult, details: Option<String>) -> Self {
        Self {
            phase,
            result,
            details,
            nodes: Vec::new(),
        }
    }
}

/// Runs `phase` over every target in order on the calling thread.
///
/// Bundles stop at the first failing step. Reboot and restart requests from
/// any step are carried into the aggregated root result.
pub fn run_phase(
    plan: &PhasePlan,
    phase: Phase,
    tree: &WorkflowTree,
    work_folder: &Path,
    cancel: &CancelToken,
) -> PhaseOutcome {
    let bundle = plan.is_bundle();
    let mut nodes = Vec::with_capacity(plan.targets().len());
    let mut restart_request: Option<AducResult> = None;
    let mut not_installed = false;

    for target in plan.targets() {
        if phase.is_async() && cancel.is_cancelled() {
            return PhaseOutcome {
                phase,
                result: AducResult::code(RESULT_FAILURE_CANCELLED),
                details: Some("cancelled before step started".to_string()),
                nodes,
            };
        }

        let ctx = PhaseContext::new(tree, target.node, work_folder, cancel);
        let result = phase.invoke(target.handler.as_ref(), &ctx);
        let (details, properties) = ctx.into_parts();
        nodes.push(NodeOutcome {
            node: target.node,
            result,
            details: details.clone(),
            properties,
        });

        if !bundle {
            return PhaseOutcome {
                phase,
                result,
                details,
                nodes,
            };
        }

        if result.is_failure() {
            let details = details.or_else(|| {
                tree.node(target.node)
                    .map(|node| format!("step `{}` failed", node.document.id))
            });
            return PhaseOutcome {
                phase,
                result,
                details,
                nodes,
            };
        }
        if result.requires_reboot() || result.requires_agent_restart() {
            restart_request = Some(match restart_request {
                Some(previous) if previous.requires_immediate_restart() => previous,
                _ => result,
            });
        }
        if phase == Phase::IsInstalled && result.result_code != RESULT_IS_INSTALLED_INSTALLED {
            not_installed = true;
        }
    }

    let result = match phase {
        Phase::IsInstalled if not_installed => AducResult::code(RESULT_IS_INSTALLED_NOT_INSTALLED),
        _ => restart_request.unwrap_or_else(|| AducResult::code(phase.success_code())),
    };
    PhaseOutcome {
        phase,
        result,
        details: None,
        nodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{RESULT_INSTALL_REQUIRED_REBOOT, RESULT_INSTALL_SUCCESS};
    use crate::workflow::{parse_workflow, SignaturePolicy};
    use std::sync::Mutex;

    struct Scripted {
        install: AducResult,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(install: AducResult) -> Arc<Self> {
            Arc::new(Self {
                install,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl ContentHandler for Scripted {
        fn download(&self, _ctx: &PhaseContext<'_>) -> AducResult {
            AducResult::code(500)
        }
        fn install(&self, ctx: &PhaseContext<'_>) -> AducResult {
            self.calls
                .lock()
                .expect("calls")
                .push(ctx.document().id.clone());
            ctx.set_property("installedBy", Value::from("scripted"));
            self.install
        }
        fn apply(&self, _ctx: &PhaseContext<'_>) -> AducResult {
            AducResult::code(700)
        }
        fn cancel(&self, _ctx: &PhaseContext<'_>) -> AducResult {
            AducResult::code(800)
        }
        fn is_installed(&self, _ctx: &PhaseContext<'_>) -> AducResult {
            AducResult::code(901)
        }
    }

    fn bundle_tree() -> WorkflowTree {
        let manifest = serde_json::json!({
            "manifestVersion": "4",
            "updateId": {"provider": "contoso", "name": "bundle", "version": "2.0"},
            "instructions": {"steps": [
                {"handler": "contoso/first:1", "files": []},
                {"handler": "contoso/second:1", "files": []}
            ]},
            "files": {}
        });
        let raw = serde_json::json!({
            "workflow": {"action": 3, "id": "bundle-1"},
            "updateManifest": manifest.to_string()
        })
        .to_string();
        parse_workflow(&raw, SignaturePolicy::Skip).expect("bundle")
    }

    fn plan_for(tree: &WorkflowTree, first: Arc<Scripted>, second: Arc<Scripted>) -> PhasePlan {
        let registry = crate::handlers::HandlerRegistry::new()
            .with_handler("contoso/first:1", first)
            .and_then(|r| r.with_handler("contoso/second:1", second))
            .expect("registry");
        registry.plan(tree).expect("plan")
    }

    #[test]
    fn bundle_steps_run_in_order_and_report_per_step_results() {
        let tree = bundle_tree();
        let first = Scripted::new(AducResult::code(RESULT_INSTALL_SUCCESS));
        let second = Scripted::new(AducResult::code(RESULT_INSTALL_REQUIRED_REBOOT));
        let plan = plan_for(&tree, first.clone(), second.clone());

        let outcome = run_phase(
            &plan,
            Phase::Install,
            &tree,
            Path::new("/tmp/unused"),
            &CancelToken::new(),
        );

        assert_eq!(outcome.result.result_code, RESULT_INSTALL_REQUIRED_REBOOT);
        assert_eq!(outcome.nodes.len(), 2);
        assert_eq!(
            outcome.nodes[0].properties.get("installedBy"),
            Some(&Value::from("scripted"))
        );
        assert_eq!(first.calls.lock().expect("calls").len(), 1);
        assert_eq!(second.calls.lock().expect("calls").len(), 1);
    }

    #[test]
    fn bundle_stops_at_first_failing_step() {
        let tree = bundle_tree();
        let first = Scripted::new(AducResult::failure(42));
        let second = Scripted::new(AducResult::code(RESULT_INSTALL_SUCCESS));
        let plan = plan_for(&tree, first, second.clone());

        let outcome = run_phase(
            &plan,
            Phase::Install,
            &tree,
            Path::new("/tmp/unused"),
            &CancelToken::new(),
        );

        assert_eq!(outcome.result, AducResult::failure(42));
        assert_eq!(outcome.nodes.len(), 1);
        assert!(outcome.details.as_deref().unwrap_or_default().contains("step_0"));
        assert!(second.calls.lock().expect("calls").is_empty());
    }

    #[test]
    fn cancelled_token_short_circuits_remaining_steps() {
        let tree = bundle_tree();
        let first = Scripted::new(AducResult::code(RESULT_INSTALL_SUCCESS));
        let second = Scripted::new(AducResult::code(RESULT_INSTALL_SUCCESS));
        let plan = plan_for(&tree, first.clone(), second);
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = run_phase(&plan, Phase::Install, &tree, Path::new("/tmp/unused"), &cancel);

        assert_eq!(outcome.result.result_code, RESULT_FAILURE_CANCELLED);
        assert!(first.calls.lock().expect("calls").is_empty());
    }

    #[test]
    fn bundle_is_installed_only_when_every_step_is() {
        let tree = bundle_tree();
        let plan = plan_for(
            &tree,
            Scripted::new(AducResult::code(RESULT_INSTALL_SUCCESS)),
            Scripted::new(AducResult::code(RESULT_INSTALL_SUCCESS)),
        );
        let outcome = run_phase(
            &plan,
            Phase::IsInstalled,
            &tree,
            Path::new("/tmp/unused"),
            &CancelToken::new(),
        );
        assert_eq!(outcome.result.result_code, RESULT_IS_INSTALLED_NOT_INSTALLED);
    }
}
