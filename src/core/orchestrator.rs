use crate::core::config::{RequiredDependency, SetupConfig};
use crate::core::extract::ArchiveExtractor;
use crate::core::fetch::{AsyncFetcher, DownloadState};
use crate::core::prompt::Confirm;
use crate::core::receipt::InstallReceipt;
use crate::core::resolver::{is_satisfied, VersionResolver};
use crate::error::{Result, SetupError};
use crate::utils::fs;
use std::path::Path;
use std::process::Command;

/// Result of one run. The environment is ready only when both pieces are installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstallOutcome {
    pub sdk_installed: bool,
    pub libs_installed: bool,
    /// The user said "no" to one of the prompts.
    pub declined: bool,
    pub failed_step: Option<Step>,
}

impl InstallOutcome {
    pub fn is_ready(&self) -> bool {
        self.sdk_installed && self.libs_installed
    }

    pub fn status(&self) -> SetupStatus {
        if self.is_ready() {
            SetupStatus::Ready
        } else if self.declined {
            SetupStatus::Declined
        } else {
            SetupStatus::Partial
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    InstallSdk,
    DownloadLibs,
    ExtractLibs,
    VerifyLibs,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::InstallSdk => "SDK installation",
            Step::DownloadLibs => "debug library download",
            Step::ExtractLibs => "debug library extraction",
            Step::VerifyLibs => "debug library verification",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStatus {
    Ready,
    Partial,
    Declined,
}

impl SetupStatus {
    /// Process exit code. `1` is reserved for hard errors before orchestration.
    pub fn exit_code(self) -> i32 {
        match self {
            SetupStatus::Ready => 0,
            SetupStatus::Partial => 2,
            SetupStatus::Declined => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stage {
    CheckSdk,
    InstallSdk,
    CheckLibs,
    DownloadLibs,
    ExtractLibs { source_url: String },
    Done,
}

pub struct InstallOrchestrator {
    config: SetupConfig,
    resolver: VersionResolver,
    fetcher: AsyncFetcher,
    extractor: ArchiveExtractor,
    prompt: Box<dyn Confirm>,
}

impl InstallOrchestrator {
    pub fn new(
        config: SetupConfig,
        resolver: VersionResolver,
        fetcher: AsyncFetcher,
        extractor: ArchiveExtractor,
        prompt: Box<dyn Confirm>,
    ) -> Self {
        Self {
            config,
            resolver,
            fetcher,
            extractor,
            prompt,
        }
    }

    pub fn config(&self) -> &SetupConfig {
        &self.config
    }

    /// Walks CheckSdk -> (InstallSdk)? -> CheckLibs -> (DownloadLibs -> ExtractLibs)? -> Done.
    pub fn run(&self) -> InstallOutcome {
        let dependency = self.config.debug_libs_dependency();
        let mut outcome = InstallOutcome::default();
        let mut stage = Stage::CheckSdk;

        loop {
            tracing::debug!(?stage, "entering stage");
            stage = match stage {
                Stage::CheckSdk => self.check_sdk(&dependency, &mut outcome),
                Stage::InstallSdk => self.install_sdk(&mut outcome),
                Stage::CheckLibs => self.check_libs(&dependency, &mut outcome),
                Stage::DownloadLibs => self.download_libs(&dependency, &mut outcome),
                Stage::ExtractLibs { source_url } => {
                    self.extract_libs(&dependency, &source_url, &mut outcome)
                }
                Stage::Done => break,
            };
        }

        tracing::info!(?outcome, "setup finished");
        outcome
    }

    fn check_sdk(&self, dependency: &RequiredDependency, outcome: &mut InstallOutcome) -> Stage {
        let sdk = &self.config.sdk;
        let probe = self.resolver.probe(dependency);

        match &probe.sdk_path {
            None => println!("\nYou don't have the {} installed!", sdk.name),
            Some(path) => {
                println!("\nLocated {} at {}", sdk.name, path);
                if is_satisfied(&probe, &sdk.required_version) {
                    println!("Correct {} located at {}", sdk.name, path);
                    outcome.sdk_installed = true;
                    return Stage::CheckLibs;
                }
                println!(
                    "You don't have the correct {} version! (Engine requires {})",
                    sdk.name, sdk.required_version
                );
            }
        }

        let question = format!(
            "Do you want to download the {} {} ({})?",
            sdk.name, sdk.required_version, sdk.approx_size
        );
        if self.prompt.confirm(&question) {
            Stage::InstallSdk
        } else {
            println!("Skipping {} installation.", sdk.name);
            outcome.declined = true;
            Stage::Done
        }
    }

    /// Downloads and launches the interactive SDK installer. The SDK never
    /// counts as installed afterwards: the tool has to be re-run once the
    /// installer is done.
    fn install_sdk(&self, outcome: &mut InstallOutcome) -> Stage {
        let sdk = &self.config.sdk;
        let url = self.config.installer_url();
        let installer = &sdk.installer_path;

        let task = self.fetcher.fetch(&url, installer, self.config.timeout());
        if task.succeeded() {
            println!("Running {} installer...", sdk.name);
            match launch_installer(installer) {
                Ok(()) => println!("After installing the {} re-run this program!", sdk.name),
                Err(e) => {
                    println!("{e}");
                    println!(
                        "Please run {} manually, then re-run this program!",
                        fs::absolute(installer).display()
                    );
                    outcome.failed_step = Some(Step::InstallSdk);
                }
            }
        } else {
            println!(
                "Failed to download {}! (tried {} -> {})",
                sdk.name,
                url,
                fs::absolute(installer).display()
            );
            outcome.failed_step = Some(Step::InstallSdk);
        }

        outcome.sdk_installed = false;
        Stage::CheckLibs
    }

    fn check_libs(&self, dependency: &RequiredDependency, outcome: &mut InstallOutcome) -> Stage {
        let probe = self.resolver.probe(dependency);
        let install_dir = fs::absolute(&dependency.install_dir);

        if probe.debug_libs_present {
            println!("\n{} located at {}", dependency.name, install_dir.display());
            outcome.libs_installed = true;
            return Stage::Done;
        }

        println!(
            "\nNo {} found. (Checked {})",
            dependency.name,
            fs::absolute(&dependency.probe_path()).display()
        );
        let question = format!(
            "Do you want to download the {} ({})?",
            dependency.name, self.config.debug_libs.approx_size
        );
        if self.prompt.confirm(&question) {
            Stage::DownloadLibs
        } else {
            println!("Skipping {} download.", dependency.name);
            outcome.declined = true;
            Stage::Done
        }
    }

    fn download_libs(&self, dependency: &RequiredDependency, outcome: &mut InstallOutcome) -> Stage {
        let archive = self.config.archive_path();
        let mirrors = self.config.mirror_urls();
        let attempts = if self.config.download.fallback_mirrors {
            mirrors.len()
        } else {
            1
        };

        for (i, url) in mirrors.iter().take(attempts).enumerate() {
            if i > 0 {
                println!("Trying mirror {} of {}...", i + 1, attempts);
            }
            let task = self.fetcher.fetch(url, &archive, self.config.timeout());
            match task.state() {
                DownloadState::Succeeded => {
                    return Stage::ExtractLibs {
                        source_url: url.clone(),
                    };
                }
                // A timeout on one mirror is not retried on the next.
                DownloadState::Cancelled => break,
                state => {
                    tracing::warn!(?state, error = task.error(), "mirror {url} failed");
                }
            }
        }

        println!(
            "Failed to download {}! (destination {})",
            dependency.name,
            fs::absolute(&archive).display()
        );
        outcome.failed_step = Some(Step::DownloadLibs);
        Stage::Done
    }

    fn extract_libs(
        &self,
        dependency: &RequiredDependency,
        source_url: &str,
        outcome: &mut InstallOutcome,
    ) -> Stage {
        let archive = self.config.archive_path();
        let install_dir = &dependency.install_dir;

        println!("Please wait while the files are being extracted...");
        if !self.extractor.extract(&archive, install_dir) {
            println!("Extraction of {} failed.", dependency.name);
            outcome.failed_step = Some(Step::ExtractLibs);
            return Stage::Done;
        }
        println!(
            "Successfully extracted \"{}\" to \"{}\"",
            fs::absolute(&archive).display(),
            fs::absolute(install_dir).display()
        );

        // A clean exit from the unpacker is not proof; the probe file must exist.
        if !self.resolver.probe(dependency).debug_libs_present {
            println!(
                "Extraction finished but {} is still missing.",
                fs::absolute(&dependency.probe_path()).display()
            );
            outcome.failed_step = Some(Step::VerifyLibs);
            return Stage::Done;
        }

        outcome.libs_installed = true;
        println!(
            "{} installed at {}",
            dependency.name,
            fs::absolute(install_dir).display()
        );

        if let Err(e) = InstallReceipt::new(dependency, source_url).save(install_dir) {
            tracing::warn!("could not write install receipt: {e}");
        }
        if self.config.extract.delete_archive {
            if let Err(e) = fs::remove_file_if_exists(&archive) {
                tracing::warn!("could not delete {}: {e}", archive.display());
            }
        }

        Stage::Done
    }
}

/// Starts the installer and waits for the user to close it.
fn launch_installer(installer: &Path) -> Result<()> {
    let program = fs::absolute(installer);
    fs::make_executable(&program)?;
    let status = Command::new(&program)
        .status()
        .map_err(|e| SetupError::LaunchError {
            program: program.clone(),
            message: e.to_string(),
        })?;
    tracing::debug!("installer exited with {status}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ExtractBackendKind;
    use crate::core::fetch::tests::FakeTransport;
    use crate::core::fetch::{CancelToken, Transport};
    use crate::core::resolver::SdkLocation;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    const GOOD_SDK: &str = r"C:\VulkanSDK\1.2.170.0";

    /// Replays canned answers and records every question asked.
    struct ScriptedPrompt {
        answers: Mutex<VecDeque<bool>>,
        asked: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedPrompt {
        fn new(answers: &[bool]) -> (Self, Arc<Mutex<Vec<String>>>) {
            let asked = Arc::new(Mutex::new(Vec::new()));
            let prompt = Self {
                answers: Mutex::new(answers.iter().copied().collect()),
                asked: Arc::clone(&asked),
            };
            (prompt, asked)
        }
    }

    impl Confirm for ScriptedPrompt {
        fn confirm(&self, message: &str) -> bool {
            self.asked.lock().unwrap().push(message.to_string());
            self.answers.lock().unwrap().pop_front().unwrap_or(false)
        }
    }

    /// Fails every URL containing `bad`, serves `body` for the rest.
    struct MirrorTransport {
        bad: &'static str,
        body: Vec<u8>,
        urls: Mutex<Vec<String>>,
    }

    impl Transport for MirrorTransport {
        fn transfer(
            &self,
            url: &str,
            destination: &Path,
            on_progress: &mut dyn FnMut(u64),
            _cancel: &CancelToken,
        ) -> anyhow::Result<()> {
            self.urls.lock().unwrap().push(url.to_string());
            if url.contains(self.bad) {
                anyhow::bail!("HTTP 404");
            }
            std::fs::write(destination, &self.body)?;
            on_progress(self.body.len() as u64);
            Ok(())
        }
    }

    fn test_config(root: &Path) -> SetupConfig {
        let mut config = SetupConfig::default();
        config.sdk.installer_path = root.join("VulkanSDK.exe");
        config.debug_libs.install_dir = root.join("vendor").join("VulkanSDK");
        config.download.timeout_secs = 10;
        config.extract.backend = ExtractBackendKind::Builtin;
        config
    }

    fn libs_zip(entries: &[&str]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for name in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"debug lib").unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn install_probe_file(config: &SetupConfig) {
        let probe = config.debug_libs_dependency().probe_path();
        std::fs::create_dir_all(probe.parent().unwrap()).unwrap();
        std::fs::write(probe, b"lib").unwrap();
    }

    fn orchestrator(
        config: SetupConfig,
        sdk_path: Option<&str>,
        transport: Arc<dyn Transport>,
        prompt: ScriptedPrompt,
    ) -> InstallOrchestrator {
        let extractor = ArchiveExtractor::from_config(&config.extract);
        InstallOrchestrator::new(
            config,
            VersionResolver::new(SdkLocation::Fixed(sdk_path.map(str::to_string))),
            AsyncFetcher::new(transport).with_progress_output(false),
            extractor,
            Box::new(prompt),
        )
    }

    #[test]
    fn test_missing_sdk_accepted_still_needs_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let installer_url = config.installer_url();
        let transport = Arc::new(FakeTransport::ok(b"#!/bin/sh\nexit 0\n"));
        let (prompt, asked) = ScriptedPrompt::new(&[true, false]);

        let outcome = orchestrator(config, None, transport.clone(), prompt).run();

        assert!(!outcome.sdk_installed);
        assert!(!outcome.is_ready());
        assert_eq!(transport.urls.lock().unwrap()[0], installer_url);
        assert_eq!(asked.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_everything_present_makes_no_network_calls() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        install_probe_file(&config);
        let transport = Arc::new(FakeTransport::ok(b"unused"));
        let (prompt, asked) = ScriptedPrompt::new(&[]);

        let outcome = orchestrator(config, Some(GOOD_SDK), transport.clone(), prompt).run();

        assert!(outcome.is_ready());
        assert_eq!(outcome.status(), SetupStatus::Ready);
        assert_eq!(transport.call_count(), 0);
        assert!(asked.lock().unwrap().is_empty());
    }

    #[test]
    fn test_declined_lib_download_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let install_dir = config.debug_libs.install_dir.clone();
        let transport = Arc::new(FakeTransport::ok(b"unused"));
        let (prompt, _) = ScriptedPrompt::new(&[false]);

        let outcome = orchestrator(config, Some(GOOD_SDK), transport.clone(), prompt).run();

        assert!(!outcome.is_ready());
        assert!(outcome.sdk_installed);
        assert_eq!(outcome.status(), SetupStatus::Declined);
        assert_eq!(transport.call_count(), 0);
        assert!(!install_dir.exists());
    }

    #[test]
    fn test_extraction_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.extract.backend = ExtractBackendKind::External;
        config.extract.tool = dir.path().join("tools").join("7z.exe");
        let transport = Arc::new(FakeTransport::ok(&libs_zip(&["Lib/shaderc_sharedd.lib"])));
        let (prompt, _) = ScriptedPrompt::new(&[true]);

        let outcome = orchestrator(config, Some(GOOD_SDK), transport.clone(), prompt).run();

        assert!(!outcome.is_ready());
        assert_eq!(outcome.failed_step, Some(Step::ExtractLibs));
        assert_eq!(outcome.status(), SetupStatus::Partial);
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn test_full_lib_install() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let install_dir = config.debug_libs.install_dir.clone();
        let archive = config.archive_path();
        let transport = Arc::new(FakeTransport::ok(&libs_zip(&[
            "Lib/shaderc_sharedd.lib",
            "Lib/spirv-cross-cored.lib",
        ])));
        let (prompt, _) = ScriptedPrompt::new(&[true]);

        let outcome = orchestrator(config, Some(GOOD_SDK), transport, prompt).run();

        assert_eq!(
            outcome,
            InstallOutcome {
                sdk_installed: true,
                libs_installed: true,
                declined: false,
                failed_step: None,
            }
        );
        assert!(install_dir.join("Lib/spirv-cross-cored.lib").is_file());
        assert!(archive.is_file());
        let receipt = InstallReceipt::load(&install_dir).unwrap().unwrap();
        assert_eq!(receipt.version, "1.2.170.0");
    }

    #[test]
    fn test_extracted_archive_without_probe_file_is_not_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = Arc::new(FakeTransport::ok(&libs_zip(&["Lib/other.lib"])));
        let (prompt, _) = ScriptedPrompt::new(&[true]);

        let outcome = orchestrator(config, Some(GOOD_SDK), transport, prompt).run();

        assert!(!outcome.libs_installed);
        assert_eq!(outcome.failed_step, Some(Step::VerifyLibs));
    }

    #[test]
    fn test_delete_archive_after_install() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.extract.delete_archive = true;
        let archive = config.archive_path();
        let transport = Arc::new(FakeTransport::ok(&libs_zip(&["Lib/shaderc_sharedd.lib"])));
        let (prompt, _) = ScriptedPrompt::new(&[true]);

        let outcome = orchestrator(config, Some(GOOD_SDK), transport, prompt).run();

        assert!(outcome.is_ready());
        assert!(!archive.exists());
    }

    #[test]
    fn test_declined_sdk_skips_lib_check() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = Arc::new(FakeTransport::ok(b"unused"));
        let install_dir = config.debug_libs.install_dir.clone();
        let installer = config.sdk.installer_path.clone();
        let (prompt, asked) = ScriptedPrompt::new(&[false]);

        let outcome =
            orchestrator(config, Some(r"C:\VulkanSDK\1.2.150.0"), transport.clone(), prompt).run();

        assert_eq!(outcome.status(), SetupStatus::Declined);
        assert!(!install_dir.exists());
        assert!(!installer.exists());
        assert!(!outcome.sdk_installed);
        assert!(!outcome.libs_installed);
        assert_eq!(transport.call_count(), 0);
        let asked = asked.lock().unwrap();
        assert_eq!(asked.len(), 1);
        assert!(asked[0].contains("1.2.170.0"));
    }

    #[test]
    fn test_falls_back_to_second_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mirrors = config.mirror_urls();
        let transport = Arc::new(MirrorTransport {
            bad: "sdk.lunarg.com",
            body: libs_zip(&["Lib/shaderc_sharedd.lib"]),
            urls: Mutex::new(Vec::new()),
        });
        let (prompt, _) = ScriptedPrompt::new(&[true]);

        let outcome = orchestrator(config, Some(GOOD_SDK), transport.clone(), prompt).run();

        assert!(outcome.is_ready());
        assert_eq!(*transport.urls.lock().unwrap(), mirrors);
        let install_dir: PathBuf = dir.path().join("vendor").join("VulkanSDK");
        let receipt = InstallReceipt::load(&install_dir).unwrap().unwrap();
        assert_eq!(receipt.source_url, mirrors[1]);
    }

    #[test]
    fn test_primary_mirror_only_when_fallback_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.download.fallback_mirrors = false;
        let transport = Arc::new(MirrorTransport {
            bad: "sdk.lunarg.com",
            body: libs_zip(&["Lib/shaderc_sharedd.lib"]),
            urls: Mutex::new(Vec::new()),
        });
        let (prompt, _) = ScriptedPrompt::new(&[true]);

        let outcome = orchestrator(config, Some(GOOD_SDK), transport.clone(), prompt).run();

        assert_eq!(outcome.failed_step, Some(Step::DownloadLibs));
        assert_eq!(transport.urls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SetupStatus::Ready.exit_code(), 0);
        assert_eq!(SetupStatus::Partial.exit_code(), 2);
        assert_eq!(SetupStatus::Declined.exit_code(), 3);
    }
}
