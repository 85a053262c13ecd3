use crate::core::progress::{download_bar, ProgressTracker};
use crate::utils::fs;
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use indicatif::HumanBytes;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const USER_AGENT: &str = concat!("User-Agent: sdk-setup/", env!("CARGO_PKG_VERSION"));

/// How long a timed-out caller waits for the worker to notice the cancel
/// before leaving it behind.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

impl DownloadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadState::Succeeded | DownloadState::Failed | DownloadState::Cancelled
        )
    }
}

/// One download attempt. Once the state is terminal it never changes again.
#[derive(Debug)]
pub struct DownloadTask {
    pub url: String,
    pub destination: PathBuf,
    pub timeout: Option<Duration>,
    state: DownloadState,
    progress: ProgressTracker,
    error: Option<String>,
}

impl DownloadTask {
    pub fn new(url: &str, destination: &Path, timeout: Option<Duration>) -> Self {
        Self {
            url: url.to_string(),
            destination: destination.to_path_buf(),
            timeout,
            state: DownloadState::Pending,
            progress: ProgressTracker::default(),
            error: None,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn succeeded(&self) -> bool {
        self.state == DownloadState::Succeeded
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn bytes_received(&self) -> u64 {
        self.progress.bytes_received()
    }

    /// Returns false, leaving the state alone, if the task already finished.
    pub fn transition(&mut self, next: DownloadState) -> bool {
        if self.state.is_terminal() {
            tracing::warn!(
                "ignoring {:?} -> {:?} for {}",
                self.state,
                next,
                self.url
            );
            return false;
        }
        tracing::debug!("download {:?} -> {:?}: {}", self.state, next, self.url);
        self.state = next;
        true
    }

    fn fail<S: Into<String>>(&mut self, message: S) {
        if self.transition(DownloadState::Failed) {
            self.error = Some(message.into());
        }
    }
}

/// Shared flag a waiting caller raises to stop a running transfer.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Moves bytes from a URL into a file.
///
/// Both methods run on the fetcher's worker thread, inside the download
/// deadline. `content_length` should give up after `timeout`. `transfer`
/// reports the running byte count through `on_progress` and should return
/// promptly once `cancel` is raised.
pub trait Transport: Send + Sync {
    fn content_length(&self, _url: &str, _timeout: Option<Duration>) -> Option<u64> {
        None
    }

    fn transfer(
        &self,
        url: &str,
        destination: &Path,
        on_progress: &mut dyn FnMut(u64),
        cancel: &CancelToken,
    ) -> Result<()>;
}

/// Downloads through the system `curl`, sampling the growing output file for progress.
pub struct CurlTransport {
    program: PathBuf,
    poll_interval: Duration,
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self {
            program: PathBuf::from("curl"),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl CurlTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `program` instead of the `curl` found on `PATH`.
    pub fn with_program<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Transport for CurlTransport {
    fn content_length(&self, url: &str, timeout: Option<Duration>) -> Option<u64> {
        let mut command = Command::new(&self.program);
        command.arg("-s").arg("-I").arg("-L");
        if let Some(limit) = timeout {
            command
                .arg("--max-time")
                .arg(limit.as_secs().max(1).to_string());
        }
        let output = command
            .arg("-H")
            .arg(USER_AGENT)
            .arg(url)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }
        parse_content_length(&String::from_utf8_lossy(&output.stdout))
    }

    fn transfer(
        &self,
        url: &str,
        destination: &Path,
        on_progress: &mut dyn FnMut(u64),
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut child = Command::new(&self.program)
            .arg("-L") // Follow redirects
            .arg("-f") // Fail on HTTP errors
            .arg("-s") // Silent
            .arg("-H")
            .arg(USER_AGENT)
            .arg("-o")
            .arg(destination)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", self.program.display()))?;

        let mut reported = 0;
        on_progress(0);

        loop {
            if let Some(status) = child.try_wait()? {
                let size = fs::file_size(destination);
                if size > reported {
                    on_progress(size);
                }
                if !status.success() {
                    return Err(anyhow::anyhow!(
                        "{} exited with {status}",
                        self.program.display()
                    ));
                }
                return Ok(());
            }

            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow::anyhow!("transfer cancelled"));
            }

            let size = fs::file_size(destination);
            if size > reported {
                reported = size;
                on_progress(size);
            }
            thread::sleep(self.poll_interval);
        }
    }
}

/// Last `Content-Length` in a (possibly redirected) header dump.
pub fn parse_content_length(headers: &str) -> Option<u64> {
    headers
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<u64>().ok()
            } else {
                None
            }
        })
        .last()
        .filter(|&len| len > 0)
}

struct TransferReport {
    result: std::result::Result<(), String>,
    progress: ProgressTracker,
}

/// Sending end of the completion channel. `signal` consumes it, so a
/// transfer can report completion at most once.
struct CompletionSignal(Sender<TransferReport>);

impl CompletionSignal {
    fn signal(self, report: TransferReport) {
        // The receiver may have gone away after a timeout; nothing to do then.
        let _ = self.0.send(report);
    }
}

pub struct AsyncFetcher {
    transport: Arc<dyn Transport>,
    show_progress: bool,
}

impl Default for AsyncFetcher {
    fn default() -> Self {
        Self::new(Arc::new(CurlTransport::new()))
    }
}

impl AsyncFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            show_progress: true,
        }
    }

    pub fn with_progress_output(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Downloads `url` to `destination`, blocking until the transfer reaches a
    /// terminal state or `timeout` elapses. Never panics or propagates errors:
    /// the outcome is the returned task's state.
    pub fn fetch(&self, url: &str, destination: &Path, timeout: Option<Duration>) -> DownloadTask {
        let mut task = DownloadTask::new(url, destination, timeout);

        if let Err(e) = self.run(&mut task) {
            println!("Was not able to download file! ({e:#})");
            task.fail(format!("{e:#}"));
        }

        if !task.succeeded() {
            if let Err(e) = fs::remove_file_if_exists(destination) {
                tracing::warn!("could not remove partial download {}: {e}", destination.display());
            }
        }

        task
    }

    /// Convenience wrapper returning only whether the file arrived.
    pub fn download_file(&self, url: &str, destination: &Path, timeout: Option<Duration>) -> bool {
        self.fetch(url, destination, timeout).succeeded()
    }

    fn run(&self, task: &mut DownloadTask) -> Result<()> {
        if task.url.trim().is_empty() {
            anyhow::bail!("download URL is empty");
        }
        if task.destination.as_os_str().is_empty() {
            anyhow::bail!("download destination is empty");
        }

        if let Some(parent) = task.destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::ensure_dir_exists(parent).with_context(|| {
                    format!("could not create {}", fs::absolute(parent).display())
                })?;
            }
        }

        // Every attempt starts from zero bytes.
        fs::remove_file_if_exists(&task.destination).with_context(|| {
            format!(
                "could not remove stale {}",
                fs::absolute(&task.destination).display()
            )
        })?;

        let (tx, rx) = bounded(1);
        let signal = CompletionSignal(tx);
        let cancel = CancelToken::default();

        println!("Downloading file:");
        println!("  {}", task.url);
        task.transition(DownloadState::InProgress);

        let handle = {
            let transport = Arc::clone(&self.transport);
            let url = task.url.clone();
            let destination = task.destination.clone();
            let timeout = task.timeout;
            let cancel = cancel.clone();
            let show_progress = self.show_progress;

            thread::Builder::new()
                .name("sdk-download".to_string())
                .spawn(move || {
                    let report = transfer_with_progress(
                        transport.as_ref(),
                        &url,
                        &destination,
                        timeout,
                        &cancel,
                        show_progress,
                    );
                    signal.signal(report);
                })
                .context("could not start download thread")?
        };

        match wait_for_completion(&rx, task.timeout) {
            Ok(report) => {
                let _ = handle.join();
                self.finish(task, report);
            }
            Err(RecvTimeoutError::Timeout) => {
                cancel.cancel();
                match rx.recv_timeout(CANCEL_GRACE) {
                    Ok(report) => {
                        let _ = handle.join();
                        task.progress = report.progress;
                    }
                    Err(_) => tracing::warn!(
                        "download thread for {} did not stop within {:?}, leaving it behind",
                        task.url,
                        CANCEL_GRACE
                    ),
                }
                println!(
                    "Download timed out after {}s, cancelled.",
                    task.timeout.map_or(0, |t| t.as_secs())
                );
                task.transition(DownloadState::Cancelled);
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                task.fail("download thread exited without reporting completion");
            }
        }

        Ok(())
    }

    fn finish(&self, task: &mut DownloadTask, report: TransferReport) {
        task.progress = report.progress;
        match report.result {
            Ok(()) if task.destination.is_file() => {
                println!("Download finished! ({})", HumanBytes(task.bytes_received()));
                task.transition(DownloadState::Succeeded);
            }
            Ok(()) => {
                println!("Failed to download file!");
                task.fail(format!(
                    "transfer finished but {} does not exist",
                    fs::absolute(&task.destination).display()
                ));
            }
            Err(message) => {
                println!("Failed to download file! ({message})");
                task.fail(message);
            }
        }
    }
}

/// Worker side of a download: size lookup, transfer and progress drawing.
fn transfer_with_progress(
    transport: &dyn Transport,
    url: &str,
    destination: &Path,
    timeout: Option<Duration>,
    cancel: &CancelToken,
    show_progress: bool,
) -> TransferReport {
    let total = transport.content_length(url, timeout);
    let mut progress = ProgressTracker::new(total);
    if cancel.is_cancelled() {
        return TransferReport {
            result: Err("transfer cancelled".to_string()),
            progress,
        };
    }

    let bar = download_bar(progress.total_bytes(), show_progress);
    let result = transport.transfer(
        url,
        destination,
        &mut |bytes: u64| {
            let sample = progress.record(bytes);
            bar.set_position(sample.bytes_received);
            if let Some(message) = progress.rate_message() {
                bar.set_message(message);
            }
        },
        cancel,
    );
    match result {
        Ok(()) => bar.finish(),
        Err(_) => bar.abandon(),
    }

    TransferReport {
        result: result.map_err(|e| format!("{e:#}")),
        progress,
    }
}

/// Single bounded wait on the completion channel.
fn wait_for_completion(
    rx: &Receiver<TransferReport>,
    timeout: Option<Duration>,
) -> std::result::Result<TransferReport, RecvTimeoutError> {
    match timeout {
        Some(timeout) => rx.recv_timeout(timeout),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    }
}
