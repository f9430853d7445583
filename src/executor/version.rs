//! Automation engine version detection and container module selection.

use std::cmp::Ordering;
use std::fmt;

/// Version reported by `ansible --version`, compared component-wise.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineVersion {
    components: Vec<u64>,
}

impl EngineVersion {
    /// Builds a version from numeric components.
    #[must_use]
    pub fn new(components: impl Into<Vec<u64>>) -> Self {
        Self {
            components: components.into(),
        }
    }

    /// Extracts the version from the first line of `ansible --version`.
    ///
    /// Both `ansible 2.9.27` and `ansible [core 2.15.3]` are understood.
    #[must_use]
    pub fn parse(output: &str) -> Option<Self> {
        let first_line = output.lines().next()?;
        first_line
            .split_whitespace()
            .map(|token| token.trim_matches(|ch| ch == '[' || ch == ']'))
            .find(|token| token.starts_with(|ch: char| ch.is_ascii_digit()))
            .and_then(Self::parse_dotted)
    }

    fn parse_dotted(raw: &str) -> Option<Self> {
        let components = raw
            .split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse::<u64>().ok()
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self { components })
    }

    /// Loose comparison where missing trailing components count as zero.
    #[must_use]
    pub fn at_least(&self, other: &Self) -> bool {
        self.compare(other) != Ordering::Less
    }

    fn compare(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        (0..len)
            .map(|idx| {
                let lhs = self.components.get(idx).copied().unwrap_or(0);
                let rhs = other.components.get(idx).copied().unwrap_or(0);
                lhs.cmp(&rhs)
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .components
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&rendered)
    }
}

/// Module used to manage containers, which was renamed in engine 2.2.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContainerModule {
    /// `docker_container`, engine 2.2 and later.
    DockerContainer,
    /// `docker`, engines before 2.2.
    Docker,
}

impl ContainerModule {
    /// Selects the module name for an engine version.
    #[must_use]
    pub fn for_version(version: &EngineVersion) -> Self {
        if version.at_least(&EngineVersion::new([2, 2])) {
            Self::DockerContainer
        } else {
            Self::Docker
        }
    }

    /// Module name as passed to the engine.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DockerContainer => "docker_container",
            Self::Docker => "docker",
        }
    }
}

/// Module that builds images from a manifest.
pub const IMAGE_MODULE: &str = "docker_image";

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ansible 2.1.0.0\n  config file = None", &[2, 1, 0, 0])]
    #[case("ansible 2.9.27\n", &[2, 9, 27])]
    #[case("ansible [core 2.15.3]\n  config file = None", &[2, 15, 3])]
    #[case("ansible 2.2.0rc1", &[2, 2, 0])]
    fn parse_understands_engine_banners(#[case] output: &str, #[case] expected: &[u64]) {
        let version = EngineVersion::parse(output).unwrap_or_else(|| panic!("parse {output}"));
        assert_eq!(version, EngineVersion::new(expected.to_vec()));
    }

    #[rstest]
    #[case("")]
    #[case("ansible\n")]
    #[case("command not found")]
    fn parse_rejects_output_without_a_version(#[case] output: &str) {
        assert_eq!(EngineVersion::parse(output), None);
    }

    #[rstest]
    #[case(&[2, 1, 0, 0], ContainerModule::Docker)]
    #[case(&[2, 2], ContainerModule::DockerContainer)]
    #[case(&[2, 2, 0, 0], ContainerModule::DockerContainer)]
    #[case(&[2, 10], ContainerModule::DockerContainer)]
    #[case(&[1, 9, 6], ContainerModule::Docker)]
    fn module_selection_switches_at_two_point_two(
        #[case] components: &[u64],
        #[case] expected: ContainerModule,
    ) {
        let version = EngineVersion::new(components.to_vec());
        assert_eq!(ContainerModule::for_version(&version), expected);
    }

    #[test]
    fn display_joins_components() {
        assert_eq!(EngineVersion::new([2, 9, 27]).to_string(), "2.9.27");
    }
}
