//! Deployment plan - the validated step graph

use crate::core::{
    resource::{ResourceKind, ResourceRef},
    step::{Step, StepAction},
};
use anyhow::Result;
use std::collections::{HashMap, HashSet};

/// A validated set of steps with a fixed execution order
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    /// Plan name
    pub name: String,

    /// Steps by ID
    pub steps: HashMap<String, Step>,

    /// Topological order, ties broken by declaration order
    execution_order: Vec<String>,
}

impl DeploymentPlan {
    /// Build and validate a plan from steps in declaration order
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Result<Self> {
        let declared: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();

        let mut by_id = HashMap::new();
        for step in steps {
            if by_id.contains_key(&step.id) {
                anyhow::bail!("Duplicate step ID: {}", step.id);
            }
            by_id.insert(step.id.clone(), step);
        }

        for id in &declared {
            let step = &by_id[id];
            for dep in &step.dependencies {
                if !by_id.contains_key(dep) {
                    anyhow::bail!("Step '{}' depends on non-existent step '{}'", step.id, dep);
                }
                if dep == &step.id {
                    anyhow::bail!("Step '{}' depends on itself", step.id);
                }
            }
        }

        let execution_order = Self::topological_sort(&declared, &by_id)?;

        let plan = Self {
            name: name.into(),
            steps: by_id,
            execution_order,
        };
        plan.check_exposure()?;
        plan.check_resource_ordering()?;
        Ok(plan)
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Get execution order (topological sort)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Steps in execution order
    pub fn ordered_steps(&self) -> impl Iterator<Item = &Step> {
        self.execution_order.iter().filter_map(|id| self.steps.get(id))
    }

    /// The endpoint discovery step, if the plan has one
    pub fn exposure_step(&self) -> Option<&Step> {
        self.ordered_steps().find(|s| s.exposure)
    }

    /// All prerequisites of a step, direct and transitive
    pub fn ancestors(&self, step_id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = vec![step_id];
        while let Some(id) = stack.pop() {
            if let Some(step) = self.steps.get(id) {
                for dep in &step.dependencies {
                    if seen.insert(dep.clone()) {
                        stack.push(dep);
                    }
                }
            }
        }
        seen
    }

    /// Kahn's algorithm over declaration order, so independent steps keep their written order
    fn topological_sort(declared: &[String], steps: &HashMap<String, Step>) -> Result<Vec<String>> {
        let mut remaining: HashMap<&str, usize> = declared
            .iter()
            .map(|id| (id.as_str(), steps[id].dependencies.len()))
            .collect();
        let mut result: Vec<String> = Vec::with_capacity(declared.len());

        while result.len() < declared.len() {
            let next = declared
                .iter()
                .find(|id| remaining.get(id.as_str()) == Some(&0))
                .cloned();

            let Some(next) = next else {
                let stuck: Vec<&str> = declared
                    .iter()
                    .map(String::as_str)
                    .filter(|id| remaining.contains_key(id))
                    .collect();
                anyhow::bail!("Cycle detected in dependency graph involving steps: {}", stuck.join(", "));
            };

            remaining.remove(next.as_str());
            for id in declared {
                if steps[id].dependencies.iter().any(|d| d == &next) {
                    if let Some(count) = remaining.get_mut(id.as_str()) {
                        *count -= steps[id].dependencies.iter().filter(|d| *d == &next).count();
                    }
                }
            }
            result.push(next);
        }

        Ok(result)
    }

    fn check_exposure(&self) -> Result<()> {
        let exposures: Vec<&str> = self
            .ordered_steps()
            .filter(|s| s.exposure)
            .map(|s| s.id.as_str())
            .collect();
        if exposures.len() > 1 {
            anyhow::bail!("Only one exposure step is allowed, found: {}", exposures.join(", "));
        }
        if let Some(id) = exposures.first() {
            let step = &self.steps[*id];
            if step.readiness_condition().is_none() {
                anyhow::bail!("Exposure step '{}' has no readiness condition to discover the endpoint", id);
            }
        }
        Ok(())
    }

    /// A resource referencing a Secret/ConfigMap/Service the plan applies must
    /// come after it: earlier in the same step, or in a transitive prerequisite
    fn check_resource_ordering(&self) -> Result<()> {
        let mut applied_by: HashMap<(String, ResourceRef), String> = HashMap::new();
        for step in self.ordered_steps() {
            if let StepAction::Apply { resources, .. } = &step.action {
                for def in resources {
                    let ns = def.namespace.clone().unwrap_or_default();
                    applied_by.insert((ns, def.resource_ref()), step.id.clone());
                }
            }
        }

        for step in self.ordered_steps() {
            let StepAction::Apply { resources, .. } = &step.action else {
                continue;
            };
            let ancestors = self.ancestors(&step.id);
            for (idx, def) in resources.iter().enumerate() {
                let ns = def.namespace.clone().unwrap_or_default();
                for reference in def.references() {
                    let Some(producer) = applied_by.get(&(ns.clone(), reference.clone())) else {
                        // Not managed by this plan; assumed to exist already
                        continue;
                    };
                    let satisfied = if producer == &step.id {
                        resources[..idx]
                            .iter()
                            .any(|d| d.resource_ref() == reference && d.namespace.clone().unwrap_or_default() == ns)
                    } else {
                        ancestors.contains(producer)
                    };
                    if !satisfied {
                        anyhow::bail!(
                            "Step '{}' applies {} which references {} before step '{}' applies it",
                            step.id,
                            def,
                            reference,
                            producer
                        );
                    }
                }
                if def.kind() != ResourceKind::Namespace {
                    if let Some(target_ns) = &def.namespace {
                        let ns_ref = ResourceRef {
                            kind: ResourceKind::Namespace,
                            name: target_ns.clone(),
                        };
                        if let Some(producer) = applied_by.get(&(String::new(), ns_ref)) {
                            if producer != &step.id && !ancestors.contains(producer) {
                                anyhow::bail!(
                                    "Step '{}' applies {} before step '{}' creates its namespace",
                                    step.id,
                                    def,
                                    producer
                                );
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource::{ResourceDefinition, SecretData, Workload};
    use std::collections::BTreeMap;

    fn apply(resources: Vec<ResourceDefinition>) -> StepAction {
        StepAction::Apply { resources, recreate: false }
    }

    #[test]
    fn test_topological_sort() {
        let plan = DeploymentPlan::new(
            "test",
            vec![
                Step::new("step3", apply(vec![])).after(["step1", "step2"]),
                Step::new("step1", apply(vec![])),
                Step::new("step2", apply(vec![])).after(["step1"]),
            ],
        )
        .unwrap();

        assert_eq!(plan.execution_order(), &["step1", "step2", "step3"]);
    }

    #[test]
    fn test_independent_steps_keep_declaration_order() {
        let plan = DeploymentPlan::new(
            "test",
            vec![
                Step::new("b", apply(vec![])),
                Step::new("a", apply(vec![])),
            ],
        )
        .unwrap();
        assert_eq!(plan.execution_order(), &["b", "a"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let err = DeploymentPlan::new(
            "test",
            vec![
                Step::new("a", apply(vec![])).after(["b"]),
                Step::new("b", apply(vec![])).after(["a"]),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("Cycle detected"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = DeploymentPlan::new("test", vec![Step::new("a", apply(vec![])).after(["ghost"])]).unwrap_err();
        assert!(err.to_string().contains("non-existent step 'ghost'"));
    }

    #[test]
    fn test_workload_before_its_secret_rejected() {
        let secret = ResourceDefinition::secret("db", SecretData::Literal(BTreeMap::new())).in_namespace("app");
        let workload = ResourceDefinition::deployment("api", 1, Workload::new("img").with_secret_env("db"))
            .in_namespace("app");

        let err = DeploymentPlan::new(
            "test",
            vec![
                Step::new("secrets", apply(vec![secret.clone()])),
                Step::new("api", apply(vec![workload.clone()])),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("references secret/db"));

        // Same step, secret first: fine
        DeploymentPlan::new("test", vec![Step::new("all", apply(vec![secret.clone(), workload.clone()]))]).unwrap();

        // Explicit dependency: fine
        DeploymentPlan::new(
            "test",
            vec![
                Step::new("secrets", apply(vec![secret])),
                Step::new("api", apply(vec![workload])).after(["secrets"]),
            ],
        )
        .unwrap();
    }

    #[test]
    fn test_external_references_are_allowed() {
        let workload = ResourceDefinition::deployment("api", 1, Workload::new("img").with_secret_env("provided"))
            .in_namespace("app");
        DeploymentPlan::new("test", vec![Step::new("api", apply(vec![workload]))]).unwrap();
    }
}
