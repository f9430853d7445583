//! BDD step definitions for the container lifecycle.

use rstest_bdd_macros::{given, then, when};
use testbed::executor::IMAGE_MODULE;
use testbed::{InstanceSpec, RunState};
use tokio::runtime::Runtime;

use super::test_helpers::{LifecycleContext, LifecycleOutcome};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

#[given("a scenario declaring \"{first}\" and \"{second}\"")]
fn scenario_declaring(
    mut lifecycle_context: LifecycleContext,
    first: String,
    second: String,
) -> LifecycleContext {
    lifecycle_context.instances = vec![
        InstanceSpec::new(first, "ubuntu", "22.04").with_group("web"),
        InstanceSpec::new(second, "centos", "7"),
    ];
    lifecycle_context
}

#[given("the provisioning images already exist")]
fn images_exist(lifecycle_context: LifecycleContext) -> LifecycleContext {
    let orchestrator = lifecycle_context.orchestrator();
    let images = orchestrator.driver().images();
    for spec in &lifecycle_context.instances {
        lifecycle_context.engine.add_image(&images.resolve_tag(spec));
    }
    lifecycle_context
}

#[given("image builds fail with \"{message}\"")]
fn image_builds_fail(lifecycle_context: LifecycleContext, message: String) -> LifecycleContext {
    lifecycle_context.engine.fail_module(IMAGE_MODULE, &message);
    lifecycle_context
}

#[given("a container named \"{name}\" is already running")]
fn container_running(lifecycle_context: LifecycleContext, name: String) -> LifecycleContext {
    lifecycle_context
        .engine
        .add_container(&name, "Up 1 minute", &[]);
    lifecycle_context
}

#[when("I bring the instances up")]
fn bring_up(mut lifecycle_context: LifecycleContext) -> Result<LifecycleContext, StepError> {
    let runtime = Runtime::new()?;
    let orchestrator = lifecycle_context.orchestrator();
    let ctx = lifecycle_context.run_context();
    let result = runtime.block_on(orchestrator.up(&ctx));
    lifecycle_context.outcome = Some(match result {
        Ok(()) => LifecycleOutcome::Success,
        Err(err) => LifecycleOutcome::Failure(err.to_string()),
    });
    Ok(lifecycle_context)
}

#[when("I destroy the instances twice")]
fn destroy_twice(mut lifecycle_context: LifecycleContext) -> Result<LifecycleContext, StepError> {
    let runtime = Runtime::new()?;
    let orchestrator = lifecycle_context.orchestrator();
    let ctx = lifecycle_context.run_context();
    let result = runtime.block_on(async {
        orchestrator.destroy(&ctx).await?;
        orchestrator.destroy(&ctx).await
    });
    lifecycle_context.outcome = Some(match result {
        Ok(()) => LifecycleOutcome::Success,
        Err(err) => LifecycleOutcome::Failure(err.to_string()),
    });
    Ok(lifecycle_context)
}

#[when("I query the status")]
fn query_status(mut lifecycle_context: LifecycleContext) -> Result<LifecycleContext, StepError> {
    let runtime = Runtime::new()?;
    let orchestrator = lifecycle_context.orchestrator();
    let ctx = lifecycle_context.run_context();
    lifecycle_context.statuses = runtime
        .block_on(orchestrator.status(&ctx))
        .map_err(|err| StepError::Assertion(format!("status failed: {err}")))?;
    Ok(lifecycle_context)
}

#[then("the lifecycle succeeds")]
fn lifecycle_succeeds(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match &lifecycle_context.outcome {
        Some(LifecycleOutcome::Success) => Ok(()),
        Some(LifecycleOutcome::Failure(message)) => Err(StepError::Assertion(format!(
            "expected success, got failure: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the lifecycle fails mentioning \"{snippet}\"")]
fn lifecycle_fails(lifecycle_context: &LifecycleContext, snippet: String) -> Result<(), StepError> {
    let Some(LifecycleOutcome::Failure(message)) = &lifecycle_context.outcome else {
        return Err(StepError::Assertion(String::from(
            "expected failure outcome",
        )));
    };
    if message.contains(&snippet) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected failure mentioning {snippet}, got: {message}"
        )))
    }
}

#[then("the running containers are \"{names}\"")]
fn running_containers(lifecycle_context: &LifecycleContext, names: String) -> Result<(), StepError> {
    let expected = names
        .split(',')
        .filter(|name| !name.is_empty())
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();
    let actual = lifecycle_context.engine.container_names();
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected containers {expected:?}, got {actual:?}"
        )))
    }
}

#[then("the run state records the \"{driver}\" driver")]
fn run_state_records(lifecycle_context: &LifecycleContext, driver: String) -> Result<(), StepError> {
    let RunState {
        driver: recorded,
        run_id,
    } = lifecycle_context.store.snapshot();
    if recorded.as_deref() != Some(driver.as_str()) {
        return Err(StepError::Assertion(format!(
            "expected driver {driver}, got {recorded:?}"
        )));
    }
    if run_id.is_none() {
        return Err(StepError::Assertion(String::from(
            "run id should be recorded",
        )));
    }
    Ok(())
}

#[then("no image is built")]
fn no_image_built(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let builds = lifecycle_context.engine.tasks_for(IMAGE_MODULE);
    if builds.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no builds, got {}",
            builds.len()
        )))
    }
}

#[then("no container is started")]
fn no_container_started(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    if lifecycle_context
        .engine
        .tasks_for("docker_container")
        .is_empty()
    {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "container module should not run",
        )))
    }
}

#[then("the status of \"{name}\" is \"{state}\"")]
fn status_of(
    lifecycle_context: &LifecycleContext,
    name: String,
    state: String,
) -> Result<(), StepError> {
    let status = lifecycle_context
        .statuses
        .iter()
        .find(|status| status.name == name)
        .ok_or_else(|| StepError::Assertion(format!("no status for {name}")))?;
    let actual = status.state.to_string();
    if actual == state {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {name} to be {state}, got {actual}"
        )))
    }
}
