use crate::core::config::RequiredDependency;
use std::path::{Component, Path, PathBuf};

/// What the local machine looks like right now. Recomputed on every probe.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvironmentProbe {
    pub sdk_path: Option<String>,
    pub sdk_version: Option<String>,
    pub debug_libs_present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkLocation {
    /// Read the SDK root from this environment variable.
    EnvVar(String),
    /// Use a fixed SDK root (or none), ignoring the environment.
    Fixed(Option<String>),
}

pub struct VersionResolver {
    location: SdkLocation,
}

impl VersionResolver {
    pub fn new(location: SdkLocation) -> Self {
        Self { location }
    }

    pub fn from_env_var(name: &str) -> Self {
        Self::new(SdkLocation::EnvVar(name.to_string()))
    }

    pub fn location(&self) -> &SdkLocation {
        &self.location
    }

    pub fn sdk_path(&self) -> Option<String> {
        let raw = match &self.location {
            SdkLocation::EnvVar(name) => std::env::var(name).ok(),
            SdkLocation::Fixed(path) => path.clone(),
        };
        raw.filter(|p| !p.trim().is_empty())
    }

    pub fn probe(&self, dependency: &RequiredDependency) -> EnvironmentProbe {
        let sdk_path = self.sdk_path();
        let sdk_version = sdk_path.as_deref().map(detect_version);
        let debug_libs_present = dependency.probe_path().is_file();

        tracing::debug!(
            ?sdk_path,
            ?sdk_version,
            debug_libs_present,
            "probed environment for {}",
            dependency.name
        );

        EnvironmentProbe {
            sdk_path,
            sdk_version,
            debug_libs_present,
        }
    }
}

/// True when the detected version, or the SDK path itself, contains
/// `required_version`.
pub fn is_satisfied(probe: &EnvironmentProbe, required_version: &str) -> bool {
    [probe.sdk_version.as_deref(), probe.sdk_path.as_deref()]
        .into_iter()
        .flatten()
        .any(|installed| version_matches(installed, required_version))
}

/// Plain substring containment, not a semantic version comparison: the SDK
/// installs into a directory named after its full version.
pub fn version_matches(installed: &str, required_version: &str) -> bool {
    !required_version.is_empty() && installed.contains(required_version)
}

/// Picks the last path component that looks like a dotted version number
/// (`C:\VulkanSDK\1.2.170.0` -> `1.2.170.0`). Falls back to the whole path.
pub fn detect_version(sdk_path: &str) -> String {
    let normalized = sdk_path.replace('\\', "/");
    let path = PathBuf::from(&normalized);

    last_version_component(&path).unwrap_or_else(|| sdk_path.to_string())
}

fn last_version_component(path: &Path) -> Option<String> {
    path.components().rev().find_map(|component| match component {
        Component::Normal(name) => {
            let name = name.to_str()?;
            looks_like_version(name).then(|| name.to_string())
        }
        _ => None,
    })
}

fn looks_like_version(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() >= 2
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}
