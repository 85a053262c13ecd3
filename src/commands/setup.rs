use crate::core::config::SetupConfig;
use crate::core::extract::ArchiveExtractor;
use crate::core::fetch::AsyncFetcher;
use crate::core::orchestrator::{InstallOrchestrator, InstallOutcome, SetupStatus};
use crate::core::prompt::{Confirm, FixedAnswer, TerminalPrompt};
use crate::core::resolver::{SdkLocation, VersionResolver};
use crate::error::Result;
use std::io::{self, Write};
use std::path::PathBuf;

/// Command-line overrides shared by `setup` and `check`.
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    pub config_path: Option<PathBuf>,
    pub sdk_path: Option<String>,
    /// `Some` answers every prompt without asking.
    pub answer: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub pause: bool,
}

impl SetupOptions {
    pub fn load_config(&self) -> Result<SetupConfig> {
        let mut config = SetupConfig::load(self.config_path.as_deref())?;
        if let Some(secs) = self.timeout_secs {
            config.download.timeout_secs = secs;
        }
        Ok(config)
    }

    pub fn resolver(&self, config: &SetupConfig) -> VersionResolver {
        match &self.sdk_path {
            Some(path) => VersionResolver::new(SdkLocation::Fixed(Some(path.clone()))),
            None => VersionResolver::from_env_var(&config.sdk.env_var),
        }
    }

    fn prompt(&self) -> Box<dyn Confirm> {
        match self.answer {
            Some(answer) => Box::new(FixedAnswer(answer)),
            None => Box::new(TerminalPrompt),
        }
    }
}

pub fn run_setup(options: &SetupOptions) -> Result<SetupStatus> {
    let config = options.load_config()?;

    println!("Welcome!");
    println!("Please wait while we make everything ready for you to get started!");

    let orchestrator = InstallOrchestrator::new(
        config.clone(),
        options.resolver(&config),
        AsyncFetcher::default(),
        ArchiveExtractor::from_config(&config.extract),
        options.prompt(),
    );
    let outcome = orchestrator.run();

    println!();
    for line in summary_lines(&config, &outcome) {
        println!("{line}");
    }

    if options.pause {
        wait_for_enter()?;
    }

    Ok(outcome.status())
}

pub fn summary_lines(config: &SetupConfig, outcome: &InstallOutcome) -> Vec<String> {
    if outcome.is_ready() {
        return vec!["✅ Setup completed! Everything is ready.".to_string()];
    }

    let mut lines = vec!["⚠️  Setup is not complete:".to_string()];
    if !outcome.sdk_installed {
        lines.push(format!(
            "  • {} {} is not installed",
            config.sdk.name, config.sdk.required_version
        ));
    }
    if !outcome.libs_installed {
        lines.push(format!("  • {} debug libs are not installed", config.sdk.name));
    }
    if let Some(step) = outcome.failed_step {
        lines.push(format!("  • {step} failed"));
    }
    if outcome.declined {
        lines.push("  • a download was declined".to_string());
    }
    lines.push("Re-run this program to finish setting up.".to_string());
    lines
}

fn wait_for_enter() -> Result<()> {
    print!("Press Enter to continue.");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::orchestrator::Step;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_summary_when_ready() {
        let outcome = InstallOutcome {
            sdk_installed: true,
            libs_installed: true,
            ..InstallOutcome::default()
        };
        assert_eq!(
            summary_lines(&SetupConfig::default(), &outcome),
            vec!["✅ Setup completed! Everything is ready.".to_string()]
        );
    }

    #[test]
    fn test_summary_names_missing_pieces() {
        let outcome = InstallOutcome {
            sdk_installed: true,
            libs_installed: false,
            declined: false,
            failed_step: Some(Step::ExtractLibs),
        };
        let lines = summary_lines(&SetupConfig::default(), &outcome);

        assert_eq!(
            lines,
            vec![
                "⚠️  Setup is not complete:".to_string(),
                "  • Vulkan SDK debug libs are not installed".to_string(),
                "  • debug library extraction failed".to_string(),
                "Re-run this program to finish setting up.".to_string(),
            ]
        );
    }

    #[test]
    fn test_timeout_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.toml");
        std::fs::write(&path, "[download]\ntimeout_secs = 60\n").unwrap();

        let options = SetupOptions {
            config_path: Some(path),
            timeout_secs: Some(5),
            ..SetupOptions::default()
        };
        assert_eq!(options.load_config().unwrap().download.timeout_secs, 5);
    }

    #[test]
    fn test_sdk_path_override_bypasses_env() {
        let options = SetupOptions {
            sdk_path: Some("/opt/vulkan/1.2.170.0".to_string()),
            ..SetupOptions::default()
        };
        let resolver = options.resolver(&SetupConfig::default());

        assert_eq!(
            resolver.location(),
            &SdkLocation::Fixed(Some("/opt/vulkan/1.2.170.0".to_string()))
        );
    }
}
