//! Behavioural smoke tests for the CLI entrypoint.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use rstest::{fixture, rstest};
use tempfile::TempDir;

const SCENARIO: &str = r#"
[[instances]]
name = "web1"
image = "ubuntu"
image_version = "22.04"

[[instances]]
name = "db1"
image = "centos"
image_version = "7"
"#;

struct Workspace {
    tmp: TempDir,
}

impl Workspace {
    fn path(&self) -> &Path {
        self.tmp.path()
    }

    fn scenario(&self) -> PathBuf {
        self.path().join("scenario.toml")
    }

    fn fake_ansible(&self) -> PathBuf {
        let script = self.path().join("fake-ansible");
        fs::write(&script, "#!/bin/sh\necho 'ansible 2.9.6'\n")
            .unwrap_or_else(|err| panic!("write fake ansible: {err}"));
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
            .unwrap_or_else(|err| panic!("chmod fake ansible: {err}"));
        script
    }
}

#[fixture]
fn workspace() -> Workspace {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("create temp dir: {err}"));
    fs::write(tmp.path().join("scenario.toml"), SCENARIO)
        .unwrap_or_else(|err| panic!("write scenario: {err}"));
    Workspace { tmp }
}

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("testbed");
    cmd.assert().failure().stderr(contains("Usage"));
}

#[test]
fn cli_help_lists_lifecycle_commands() {
    let mut cmd = cargo_bin_cmd!("testbed");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(contains("create"))
        .stdout(contains("destroy"))
        .stdout(contains("inventory"));
}

#[rstest]
fn unknown_drivers_fail_with_status_one(workspace: Workspace) {
    let mut cmd = cargo_bin_cmd!("testbed");
    cmd.current_dir(workspace.path());
    cmd.args(["--driver", "vagrant", "list"]);

    cmd.assert()
        .code(1)
        .stderr(contains("unknown driver 'vagrant'"));
}

#[rstest]
fn missing_scenarios_are_reported(workspace: Workspace) {
    let mut cmd = cargo_bin_cmd!("testbed");
    cmd.current_dir(workspace.path());
    cmd.args(["--scenario", "absent.toml", "status"]);

    cmd.assert().code(1).stderr(contains("absent.toml"));
}

#[rstest]
fn inventory_and_login_use_the_docker_transport(workspace: Workspace) {
    let ansible = workspace.fake_ansible();
    let state_dir = workspace.path().join(".state");
    let scenario = workspace.scenario();

    let mut inventory = cargo_bin_cmd!("testbed");
    inventory
        .current_dir(workspace.path())
        .env("TESTBED_ANSIBLE_BIN", &ansible)
        .env("TESTBED_STATE_DIR", &state_dir)
        .arg("--scenario")
        .arg(&scenario)
        .args(["--driver", "docker", "inventory"]);
    inventory
        .assert()
        .success()
        .stdout("web1 ansible_connection=docker\ndb1 ansible_connection=docker\n");

    let mut login = cargo_bin_cmd!("testbed");
    login
        .current_dir(workspace.path())
        .env("TESTBED_ANSIBLE_BIN", &ansible)
        .env("TESTBED_STATE_DIR", &state_dir)
        .arg("--scenario")
        .arg(&scenario)
        .args(["--driver", "docker", "login", "db1"]);
    login
        .assert()
        .success()
        .stdout("docker exec -ti db1 bash\n");
}

#[rstest]
fn login_rejects_undeclared_instances(workspace: Workspace) {
    let ansible = workspace.fake_ansible();
    let mut cmd = cargo_bin_cmd!("testbed");
    cmd.current_dir(workspace.path())
        .env("TESTBED_ANSIBLE_BIN", &ansible)
        .args(["--driver", "docker", "login", "ghost"]);

    cmd.assert()
        .code(1)
        .stderr(contains("instance 'ghost' is not declared"));
}
