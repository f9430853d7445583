//! Per-invocation context handed to every driver operation.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::instance::InstanceSpec;

/// Declared instances plus the run identity and cancellation signal.
#[derive(Clone, Debug)]
pub struct RunContext {
    run_id: Uuid,
    instances: Vec<InstanceSpec>,
    cancel: CancellationToken,
}

impl RunContext {
    /// Creates a context with a fresh run identifier.
    #[must_use]
    pub fn new(instances: Vec<InstanceSpec>) -> Self {
        Self::with_run_id(Uuid::new_v4(), instances)
    }

    /// Creates a context that resumes an existing run.
    #[must_use]
    pub fn with_run_id(run_id: Uuid, instances: Vec<InstanceSpec>) -> Self {
        Self {
            run_id,
            instances,
            cancel: CancellationToken::new(),
        }
    }

    /// Identifier shared by every resource of this run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Declared instances in scenario order.
    #[must_use]
    pub fn instances(&self) -> &[InstanceSpec] {
        &self.instances
    }

    /// Looks up a declared instance by name.
    #[must_use]
    pub fn instance(&self, name: &str) -> Option<&InstanceSpec> {
        self.instances.iter().find(|spec| spec.name == name)
    }

    /// Token observed by long-running waits.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_lookup_matches_by_name() {
        let ctx = RunContext::new(vec![
            InstanceSpec::new("web1", "ubuntu", "18.04"),
            InstanceSpec::new("db1", "centos", "7"),
        ]);
        assert_eq!(ctx.instance("db1").map(|spec| spec.image.as_str()), Some("centos"));
        assert!(ctx.instance("missing").is_none());
    }

    #[test]
    fn resumed_contexts_keep_their_run_id() {
        let run_id = Uuid::new_v4();
        let ctx = RunContext::with_run_id(run_id, Vec::new());
        assert_eq!(ctx.run_id(), run_id);
        assert!(!ctx.cancellation().is_cancelled());
    }
}
