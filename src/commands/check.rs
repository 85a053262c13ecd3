use crate::commands::setup::SetupOptions;
use crate::core::config::SetupConfig;
use crate::core::orchestrator::SetupStatus;
use crate::core::receipt::InstallReceipt;
use crate::core::resolver::{is_satisfied, EnvironmentProbe, VersionResolver};
use crate::error::Result;
use crate::utils::fs;
use std::path::PathBuf;

/// Read-only view of the environment; building one touches neither the
/// network nor the install directory.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentReport {
    pub probe: EnvironmentProbe,
    pub sdk_satisfied: bool,
    pub probe_path: PathBuf,
    pub receipt: Option<InstallReceipt>,
}

impl EnvironmentReport {
    pub fn is_ready(&self) -> bool {
        self.sdk_satisfied && self.probe.debug_libs_present
    }
}

pub fn inspect(config: &SetupConfig, resolver: &VersionResolver) -> EnvironmentReport {
    let dependency = config.debug_libs_dependency();
    let probe = resolver.probe(&dependency);
    let sdk_satisfied = is_satisfied(&probe, &config.sdk.required_version);

    let receipt = match InstallReceipt::load(&dependency.install_dir) {
        Ok(receipt) => receipt,
        Err(e) => {
            tracing::warn!("ignoring unreadable install receipt: {e}");
            None
        }
    };

    EnvironmentReport {
        probe,
        sdk_satisfied,
        probe_path: fs::absolute(&dependency.probe_path()),
        receipt,
    }
}

pub fn check_environment(options: &SetupOptions) -> Result<SetupStatus> {
    let config = options.load_config()?;
    let report = inspect(&config, &options.resolver(&config));
    let sdk = &config.sdk;

    println!("🔍 Engine Environment Check");
    println!();

    println!("📦 {}:", sdk.name);
    println!("  required version: {}", sdk.required_version);
    match &report.probe.sdk_path {
        Some(path) => {
            println!("  location: {path}");
            if let Some(version) = &report.probe.sdk_version {
                println!("  detected version: {version}");
            }
            if report.sdk_satisfied {
                println!("    ✅ version matches");
            } else {
                println!("    ❌ wrong version");
            }
        }
        None => {
            println!("  ❌ not installed ({} is not set)", sdk.env_var);
        }
    }

    println!();
    println!("📁 Debug libraries:");
    println!("  probe file: {}", report.probe_path.display());
    if report.probe.debug_libs_present {
        println!("    ✅ present");
    } else {
        println!("    ❌ missing");
    }
    if let Some(receipt) = &report.receipt {
        println!(
            "  installed {} from {} ({})",
            receipt.version,
            receipt.source_url,
            receipt.installed_at.format("%Y-%m-%d %H:%M UTC")
        );
    }

    println!();
    if report.is_ready() {
        println!("🎉 Environment looks good! No issues found.");
        Ok(SetupStatus::Ready)
    } else {
        println!("💡 Run 'sdk-setup setup' to install what is missing.");
        Ok(SetupStatus::Partial)
    }
}
