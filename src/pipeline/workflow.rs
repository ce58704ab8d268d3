use crate::errors::{CoordError, CoordResult};
use crate::worker::WorkerRole;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Workflow used when a task names none, and the fallback for unknown names.
pub const DEFAULT_WORKFLOW: &str = "default";

fn default_review_threshold() -> f64 {
    0.7
}

fn default_max_retries() -> u32 {
    2
}

/// A fixed, linear sequence of stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub pipeline: Vec<WorkerRole>,
    /// Minimum confidence required to leave the review stage
    #[serde(default = "default_review_threshold")]
    pub review_threshold: f64,
    /// Retry ceiling; carried for the layer that retries, not acted on here
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Position of a stage within a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInfo {
    pub stage: WorkerRole,
    pub index: usize,
    pub total: usize,
    pub is_first: bool,
    pub is_last: bool,
    pub previous: Option<WorkerRole>,
    pub next: Option<WorkerRole>,
}

impl Workflow {
    pub fn new(pipeline: Vec<WorkerRole>) -> Self {
        Self {
            pipeline,
            review_threshold: default_review_threshold(),
            max_retries: default_max_retries(),
        }
    }

    pub fn position(&self, stage: WorkerRole) -> Option<usize> {
        self.pipeline.iter().position(|s| *s == stage)
    }

    pub fn entry_stage(&self) -> Option<WorkerRole> {
        self.pipeline.first().copied()
    }

    pub fn next_stage(&self, stage: WorkerRole) -> Option<WorkerRole> {
        self.position(stage)
            .and_then(|i| self.pipeline.get(i + 1).copied())
    }

    pub fn stage_info(&self, stage: WorkerRole) -> Option<StageInfo> {
        let index = self.position(stage)?;
        let total = self.pipeline.len();
        Some(StageInfo {
            stage,
            index,
            total,
            is_first: index == 0,
            is_last: index + 1 == total,
            previous: index.checked_sub(1).map(|i| self.pipeline[i]),
            next: self.pipeline.get(index + 1).copied(),
        })
    }

    /// True iff the stage right after `stage` is the review stage.
    pub fn needs_review_before_advance(&self, stage: WorkerRole) -> bool {
        self.next_stage(stage).is_some_and(|next| next.is_review())
    }
}

/// A workflow together with the name it was resolved under.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedWorkflow {
    pub name: String,
    pub workflow: Workflow,
}

/// All configured workflows, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct WorkflowSet {
    workflows: BTreeMap<String, Workflow>,
}

impl WorkflowSet {
    pub fn new(workflows: BTreeMap<String, Workflow>) -> Self {
        Self { workflows }
    }

    pub fn get(&self, name: &str) -> Option<&Workflow> {
        self.workflows.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(String::as_str)
    }

    /// Resolve `name`, falling back to the default workflow for unknown or absent names.
    pub fn resolve(&self, name: Option<&str>) -> CoordResult<NamedWorkflow> {
        let requested = name.unwrap_or(DEFAULT_WORKFLOW);
        if let Some(workflow) = self.workflows.get(requested) {
            return Ok(NamedWorkflow {
                name: requested.to_string(),
                workflow: workflow.clone(),
            });
        }

        match self.workflows.get(DEFAULT_WORKFLOW) {
            Some(workflow) => {
                tracing::warn!(
                    workflow = requested,
                    "unknown workflow, falling back to '{}'",
                    DEFAULT_WORKFLOW
                );
                Ok(NamedWorkflow {
                    name: DEFAULT_WORKFLOW.to_string(),
                    workflow: workflow.clone(),
                })
            }
            None => Err(CoordError::WorkflowNotFound {
                name: requested.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkerRole::*;

    fn standard() -> Workflow {
        Workflow::new(vec![Backend, Review, Frontend, Qa])
    }

    fn set_with(names: &[(&str, Workflow)]) -> WorkflowSet {
        WorkflowSet::new(
            names
                .iter()
                .map(|(n, w)| (n.to_string(), w.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_stage_info_first_stage() {
        let info = standard().stage_info(Backend).unwrap();
        assert_eq!(info.index, 0);
        assert!(info.is_first);
        assert!(!info.is_last);
        assert_eq!(info.previous, None);
        assert_eq!(info.next, Some(Review));
    }

    #[test]
    fn test_stage_info_last_stage() {
        let info = standard().stage_info(Qa).unwrap();
        assert_eq!(info.index, 3);
        assert!(info.is_last);
        assert_eq!(info.previous, Some(Frontend));
        assert_eq!(info.next, None);
    }

    #[test]
    fn test_stage_info_serializes_camel_case() {
        let value = serde_json::to_value(standard().stage_info(Backend).unwrap()).unwrap();
        assert_eq!(value["isFirst"], true);
        assert_eq!(value["next"], "review");
    }

    #[test]
    fn test_absent_stage_has_no_info() {
        assert!(standard().stage_info(Integrate).is_none());
        assert_eq!(standard().next_stage(Verify), None);
    }

    #[test]
    fn test_needs_review_before_advance() {
        let wf = standard();
        assert!(wf.needs_review_before_advance(Backend));
        assert!(!wf.needs_review_before_advance(Review));
        assert!(!wf.needs_review_before_advance(Qa));
    }

    #[test]
    fn test_resolve_named_and_default() {
        let set = set_with(&[
            ("default", standard()),
            ("backend_only", Workflow::new(vec![Backend, Review])),
        ]);
        assert_eq!(set.resolve(Some("backend_only")).unwrap().name, "backend_only");
        assert_eq!(set.resolve(None).unwrap().name, "default");
    }

    #[test]
    fn test_unknown_workflow_falls_back_to_default() {
        let set = set_with(&[("default", standard())]);
        let resolved = set.resolve(Some("nope")).unwrap();
        assert_eq!(resolved.name, "default");
        assert_eq!(resolved.workflow, standard());
    }

    #[test]
    fn test_unknown_workflow_without_default_fails() {
        let set = set_with(&[("fast", Workflow::new(vec![Backend]))]);
        let err = set.resolve(Some("nope")).unwrap_err();
        assert!(matches!(err, CoordError::WorkflowNotFound { ref name } if name == "nope"));
    }
}
