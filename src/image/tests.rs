//! Tests for canonical tags and build decisions.

use super::*;
use crate::test_support::FakeEngine;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct BuildFixture {
    _tmp: TempDir,
    builder: ImageBuilder,
    engine: FakeEngine,
}

#[fixture]
fn build_fixture() -> BuildFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let work_dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    BuildFixture {
        _tmp: tmp,
        builder: ImageBuilder::new(work_dir, true),
        engine: FakeEngine::new(),
    }
}

fn tags(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|tag| (*tag).to_owned()).collect()
}

#[rstest]
#[case(None, "ubuntu:18.04")]
#[case(Some(""), "ubuntu:18.04")]
#[case(Some("myreg"), "myreg/ubuntu:18.04")]
#[case(Some("registry.example.com:5000/team"), "registry.example.com_5000_team/ubuntu:18.04")]
fn resolve_tag_sanitises_the_registry(#[case] registry: Option<&str>, #[case] expected: &str) {
    let builder = ImageBuilder::new("/work", true);
    let mut spec = InstanceSpec::new("web1", "ubuntu", "18.04");
    spec.registry = registry.map(ToOwned::to_owned);

    assert_eq!(builder.resolve_tag(&spec), expected);
}

#[test]
fn resolve_tag_ignores_the_registry_for_overrides() {
    let builder = ImageBuilder::new("/work", true);
    let spec = InstanceSpec::new("web1", "ubuntu", "18.04")
        .with_registry("myreg")
        .with_dockerfile("FROM ubuntu:18.04\n");

    assert_eq!(builder.resolve_tag(&spec), "ubuntu:18.04");
}

#[test]
fn resolve_tag_without_builds_is_the_base_reference() {
    let builder = ImageBuilder::new("/work", false);
    let spec = InstanceSpec::new("web1", "ubuntu", "18.04").with_registry("quay.io/team");

    assert_eq!(builder.resolve_tag(&spec), "quay.io/team/ubuntu:18.04");
}

#[test]
fn resolve_tag_is_deterministic() {
    let builder = ImageBuilder::new("/work", true);
    let spec = InstanceSpec::new("web1", "centos", "7").with_registry("myreg");

    assert_eq!(builder.resolve_tag(&spec), builder.resolve_tag(&spec.clone()));
}

#[rstest]
fn existing_tag_skips_the_build(build_fixture: BuildFixture) {
    let spec = InstanceSpec::new("web1", "ubuntu", "18.04").with_registry("myreg");

    let outcome = build_fixture
        .builder
        .ensure_built(
            &spec,
            &tags(&["myreg/ubuntu:18.04"]),
            &build_fixture.engine.executor(),
        )
        .unwrap_or_else(|err| panic!("ensure_built: {err}"));

    assert_eq!(outcome, BuildOutcome::Skipped);
    assert!(build_fixture.engine.tasks().is_empty());
    assert!(!build_fixture.builder.manifest_path().exists());
}

#[rstest]
fn missing_tag_builds_from_a_generated_manifest(build_fixture: BuildFixture) {
    let spec = InstanceSpec::new("web1", "ubuntu", "18.04")
        .with_registry("myreg")
        .with_env("FOO", "bar");

    let outcome = build_fixture
        .builder
        .ensure_built(&spec, &tags(&[]), &build_fixture.engine.executor())
        .unwrap_or_else(|err| panic!("ensure_built: {err}"));

    assert_eq!(outcome, BuildOutcome::Built);
    let manifest = std::fs::read_to_string(build_fixture.builder.manifest_path())
        .unwrap_or_else(|err| panic!("read manifest: {err}"));
    assert!(manifest.starts_with("FROM myreg/ubuntu:18.04\nENV FOO bar\n"));

    let builds = build_fixture.engine.tasks_for(IMAGE_MODULE);
    let build = builds
        .first()
        .unwrap_or_else(|| panic!("a build should have been submitted"));
    assert_eq!(build.arg_str("name"), Some("myreg/ubuntu:18.04"));
    assert_eq!(
        build.arg_str("path"),
        Some(build_fixture.builder.work_dir().as_str())
    );
    assert_eq!(
        build.arg_str("dockerfile"),
        Some(build_fixture.builder.manifest_path().as_str())
    );
}

#[rstest]
fn override_always_rebuilds(build_fixture: BuildFixture) {
    let manifest = "FROM ubuntu:18.04\nRUN apt-get update\n";
    let spec = InstanceSpec::new("web1", "ubuntu", "18.04").with_dockerfile(manifest);

    let outcome = build_fixture
        .builder
        .ensure_built(
            &spec,
            &tags(&["ubuntu:18.04"]),
            &build_fixture.engine.executor(),
        )
        .unwrap_or_else(|err| panic!("ensure_built: {err}"));

    assert_eq!(outcome, BuildOutcome::Built);
    let written = std::fs::read_to_string(build_fixture.builder.manifest_path())
        .unwrap_or_else(|err| panic!("read manifest: {err}"));
    assert_eq!(written, manifest);
}

#[rstest]
fn disabled_builds_never_touch_the_backend(build_fixture: BuildFixture) {
    let builder = ImageBuilder::new(build_fixture.builder.work_dir(), false);
    let spec = InstanceSpec::new("web1", "ubuntu", "18.04");

    let outcome = builder
        .ensure_built(&spec, &tags(&[]), &build_fixture.engine.executor())
        .unwrap_or_else(|err| panic!("ensure_built: {err}"));

    assert_eq!(outcome, BuildOutcome::Skipped);
    assert!(build_fixture.engine.tasks().is_empty());
}

#[rstest]
fn build_failure_is_reported_with_the_tag(build_fixture: BuildFixture) {
    build_fixture
        .engine
        .fail_module(IMAGE_MODULE, "pull access denied for myreg/ubuntu");
    let spec = InstanceSpec::new("web1", "ubuntu", "18.04").with_registry("myreg");

    let err = build_fixture
        .builder
        .ensure_built(&spec, &tags(&[]), &build_fixture.engine.executor())
        .expect_err("build should fail");

    let ImageError::Build { tag, source } = err else {
        panic!("expected a build error");
    };
    assert_eq!(tag, "myreg/ubuntu:18.04");
    assert!(source.to_string().contains("pull access denied"));
}

#[test]
fn unwritable_work_dir_is_a_manifest_error() {
    let builder = ImageBuilder::new("/nonexistent/testbed/work", true);
    let engine = FakeEngine::new();
    let spec = InstanceSpec::new("web1", "ubuntu", "18.04");

    let err = builder
        .ensure_built(&spec, &tags(&[]), &engine.executor())
        .expect_err("manifest write should fail");

    assert!(matches!(err, ImageError::ManifestWrite { .. }));
    assert!(engine.tasks().is_empty());
}

#[rstest]
#[case("myreg", "myreg")]
#[case("myreg/", "myreg")]
#[case("host:5000/ns", "host_5000_ns")]
fn sanitise_registry_replaces_separators(#[case] raw: &str, #[case] expected: &str) {
    assert_eq!(sanitise_registry(raw), expected);
}
