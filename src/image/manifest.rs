//! Build manifest rendering.
//!
//! Generated manifests start from the declared base image, declare the
//! instance environment, then install Python and sudo through whichever
//! package manager the image ships. Each bootstrap step is guarded so images
//! without a matching package manager still build.

use crate::instance::InstanceSpec;

/// Package bootstrap commands, one per supported OS family.
pub const BOOTSTRAP_COMMANDS: [&str; 3] = [
    r#"if [ -x "$(command -v apt-get)" ]; then apt-get update && apt-get install -y python sudo; fi"#,
    r#"if [ -x "$(command -v yum)" ]; then yum makecache fast && yum update -y && yum install -y python sudo yum-plugin-ovl && sed -i "s/plugins=0/plugins=1/g" /etc/yum.conf; fi"#,
    r#"if [ -x "$(command -v zypper)" ]; then zypper refresh && zypper update -y && zypper install -y python sudo; fi"#,
];

/// Base image reference, `registry/image` or plain `image`.
#[must_use]
pub fn base_reference(spec: &InstanceSpec) -> String {
    spec.registry().map_or_else(
        || spec.image.clone(),
        |registry| format!("{}/{}", registry.trim_end_matches('/'), spec.image),
    )
}

/// Renders the manifest for `spec`: the literal override when present,
/// otherwise the generated bootstrap manifest.
#[must_use]
pub fn render(spec: &InstanceSpec) -> String {
    spec.dockerfile
        .clone()
        .unwrap_or_else(|| render_generated(spec))
}

fn render_generated(spec: &InstanceSpec) -> String {
    let mut lines = Vec::with_capacity(1 + spec.environment.len() + BOOTSTRAP_COMMANDS.len());
    lines.push(format!("FROM {}:{}", base_reference(spec), spec.image_version));
    lines.extend(
        spec.environment
            .iter()
            .map(|(key, value)| format!("ENV {key} {value}")),
    );
    lines.extend(
        BOOTSTRAP_COMMANDS
            .iter()
            .map(|command| format!("RUN bash -c '{command}'")),
    );
    let mut manifest = lines.join("\n");
    manifest.push('\n');
    manifest
}

/// Renders the bootstrap commands as a shell script, used as first-boot
/// user data on cloud instances.
#[must_use]
pub fn bootstrap_script() -> String {
    let mut script = String::from("#!/bin/bash\nset -u\n");
    for command in BOOTSTRAP_COMMANDS {
        script.push_str(command);
        script.push('\n');
    }
    script
}
