use crate::error::{Result, SetupError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "sdk-setup.toml";
const VERSION_PLACEHOLDER: &str = "{version}";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct SetupConfig {
    pub sdk: SdkConfig,
    pub debug_libs: DebugLibsConfig,
    pub download: DownloadConfig,
    pub extract: ExtractConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SdkConfig {
    pub name: String,
    pub required_version: String,
    /// Environment variable naming the installed SDK root.
    pub env_var: String,
    pub installer_url: String,
    pub installer_path: PathBuf,
    pub approx_size: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DebugLibsConfig {
    pub install_dir: PathBuf,
    /// Relative to `install_dir`.
    pub probe_file: PathBuf,
    pub archive_name: String,
    pub mirrors: Vec<String>,
    pub approx_size: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    /// Hard deadline per transfer. Zero disables it.
    pub timeout_secs: u64,
    pub fallback_mirrors: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExtractBackendKind {
    External,
    Builtin,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExtractConfig {
    pub backend: ExtractBackendKind,
    pub tool: PathBuf,
    pub check_exit_code: bool,
    pub delete_archive: bool,
}

impl Default for SdkConfig {
    fn default() -> Self {
        SdkConfig {
            name: "Vulkan SDK".to_string(),
            required_version: "1.2.170.0".to_string(),
            env_var: "VULKAN_SDK".to_string(),
            installer_url:
                "https://sdk.lunarg.com/sdk/download/{version}/windows/VulkanSDK-{version}-Installer.exe"
                    .to_string(),
            installer_path: PathBuf::from("./VulkanSDK.exe"),
            approx_size: "~250 MB".to_string(),
        }
    }
}

impl Default for DebugLibsConfig {
    fn default() -> Self {
        DebugLibsConfig {
            install_dir: PathBuf::from("../Hazel/vendor/VulkanSDK"),
            probe_file: PathBuf::from("Lib/shaderc_sharedd.lib"),
            archive_name: "VulkanSDK-{version}-DebugLibs.zip".to_string(),
            mirrors: vec![
                "https://sdk.lunarg.com/sdk/download/{version}/windows/VulkanSDK-{version}-DebugLibs.zip"
                    .to_string(),
                "https://files.lunarg.com/SDK-{version}/VulkanSDK-{version}-DebugLibs.zip"
                    .to_string(),
            ],
            approx_size: "~400 MB".to_string(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        DownloadConfig {
            timeout_secs: 3600,
            fallback_mirrors: true,
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfig {
            backend: ExtractBackendKind::External,
            tool: PathBuf::from("./7z.exe"),
            check_exit_code: true,
            delete_archive: false,
        }
    }
}

impl SetupConfig {
    /// Loads configuration from `explicit` if given, otherwise from
    /// `./sdk-setup.toml`, then the user config directory, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(SetupError::ConfigNotFound {
                    path: path.to_path_buf(),
                });
            }
            return Self::from_file(path);
        }

        for candidate in default_config_paths() {
            if candidate.is_file() {
                tracing::debug!("using config file {}", candidate.display());
                return Self::from_file(&candidate);
            }
        }

        tracing::debug!("no config file found, using built-in defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SetupConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sdk.required_version.trim().is_empty() {
            return Err(SetupError::config_error("sdk.required_version must not be empty"));
        }
        if self.sdk.env_var.trim().is_empty() {
            return Err(SetupError::config_error("sdk.env_var must not be empty"));
        }
        if self.debug_libs.mirrors.is_empty() {
            return Err(SetupError::config_error(
                "debug_libs.mirrors must list at least one URL",
            ));
        }
        if self.debug_libs.probe_file.as_os_str().is_empty() {
            return Err(SetupError::config_error("debug_libs.probe_file must not be empty"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.download.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn installer_url(&self) -> String {
        self.expand(&self.sdk.installer_url)
    }

    pub fn mirror_urls(&self) -> Vec<String> {
        self.debug_libs
            .mirrors
            .iter()
            .map(|url| self.expand(url))
            .collect()
    }

    pub fn archive_path(&self) -> PathBuf {
        self.debug_libs
            .install_dir
            .join(self.expand(&self.debug_libs.archive_name))
    }

    pub fn debug_libs_dependency(&self) -> RequiredDependency {
        RequiredDependency {
            name: format!("{} debug libs", self.sdk.name),
            required_version: self.sdk.required_version.clone(),
            install_dir: self.debug_libs.install_dir.clone(),
            probe_file: self.debug_libs.probe_file.clone(),
        }
    }

    fn expand(&self, template: &str) -> String {
        template.replace(VERSION_PLACEHOLDER, &self.sdk.required_version)
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("sdk-setup").join("config.toml"));
    }
    paths
}

/// A dependency the engine needs, fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredDependency {
    pub name: String,
    pub required_version: String,
    pub install_dir: PathBuf,
    pub probe_file: PathBuf,
}

impl RequiredDependency {
    /// Full path of the file whose existence marks the dependency as installed.
    pub fn probe_path(&self) -> PathBuf {
        self.install_dir.join(&self.probe_file)
    }
}
