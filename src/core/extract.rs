use crate::core::config::{ExtractBackendKind, ExtractConfig};
use crate::utils::fs;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use tar::Archive;
use zip::ZipArchive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractBackend {
    /// Runs `<tool> x -y "<archive>"` inside the target directory.
    External { tool: PathBuf, check_exit_code: bool },
    Builtin,
}

pub struct ArchiveExtractor {
    backend: ExtractBackend,
}

impl ArchiveExtractor {
    pub fn new(backend: ExtractBackend) -> Self {
        Self { backend }
    }

    pub fn from_config(config: &ExtractConfig) -> Self {
        let backend = match config.backend {
            ExtractBackendKind::External => ExtractBackend::External {
                tool: config.tool.clone(),
                check_exit_code: config.check_exit_code,
            },
            ExtractBackendKind::Builtin => ExtractBackend::Builtin,
        };
        Self::new(backend)
    }

    pub fn backend(&self) -> &ExtractBackend {
        &self.backend
    }

    /// Unpacks `archive_path` into `target_dir`. Failures are printed with the
    /// absolute paths involved and reported as `false`.
    pub fn extract(&self, archive_path: &Path, target_dir: &Path) -> bool {
        let archive_path = fs::absolute(archive_path);
        let target_dir = fs::absolute(target_dir);

        match self.try_extract(&archive_path, &target_dir) {
            Ok(()) => true,
            Err(e) => {
                println!("{e:#}");
                println!(
                    "Error in extracting archive. Please manually extract {} to {} or re-run this!",
                    archive_path.display(),
                    target_dir.display()
                );
                false
            }
        }
    }

    fn try_extract(&self, archive_path: &Path, target_dir: &Path) -> Result<()> {
        tracing::info!(
            "extracting {} into {}",
            archive_path.display(),
            target_dir.display()
        );
        fs::ensure_dir_exists(target_dir)
            .with_context(|| format!("could not create {}", target_dir.display()))?;

        match &self.backend {
            ExtractBackend::External {
                tool,
                check_exit_code,
            } => run_external(tool, archive_path, target_dir, *check_exit_code),
            ExtractBackend::Builtin => extract_builtin(archive_path, target_dir),
        }
    }
}

/// Bare names are looked up on `PATH`; anything with a directory part is made absolute.
fn resolve_tool(tool: &Path) -> Result<PathBuf> {
    if tool.components().count() == 1 && !tool.exists() {
        return which::which(tool)
            .with_context(|| format!("unpack tool {} not found on PATH", tool.display()));
    }
    Ok(fs::absolute(tool))
}

fn run_external(
    tool: &Path,
    archive_path: &Path,
    target_dir: &Path,
    check_exit_code: bool,
) -> Result<()> {
    let program = resolve_tool(tool)?;
    tracing::debug!("running {} x -y {}", program.display(), archive_path.display());

    let status = Command::new(&program)
        .current_dir(target_dir)
        .arg("x")
        .arg("-y")
        .arg(archive_path)
        .status()
        .with_context(|| format!("failed to launch {}", program.display()))?;

    if check_exit_code && !status.success() {
        anyhow::bail!(
            "{} exited with status {:?} while extracting {}",
            program.display(),
            status.code(),
            archive_path.display()
        );
    }
    Ok(())
}

fn extract_builtin(archive_path: &Path, destination: &Path) -> Result<()> {
    let file_name = archive_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid archive file name"))?;

    if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
        extract_tar_gz(archive_path, destination)
    } else if file_name.ends_with(".zip") {
        extract_zip(archive_path, destination)
    } else {
        Err(anyhow::anyhow!("Unsupported archive format: {}", file_name))
    }
}

fn extract_tar_gz(archive_path: &Path, destination: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.unpack(destination)?;
    Ok(())
}

fn extract_zip(archive_path: &Path, destination: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let outpath = match entry.enclosed_name() {
            Some(path) => destination.join(path),
            None => {
                tracing::warn!("skipping unsafe archive entry {}", entry.name());
                continue;
            }
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        std::io::copy(&mut entry, &mut outfile)?;
    }
    Ok(())
}
