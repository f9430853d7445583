//! BDD scenarios for the container lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Create builds images and starts every container"
)]
fn scenario_create(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Existing images are reused"
)]
fn scenario_reuse_images(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Build failures abort before any container starts"
)]
fn scenario_build_failure(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Destroy removes every container and can be repeated"
)]
fn scenario_destroy(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Status reports missing instances as not created"
)]
fn scenario_status(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}
