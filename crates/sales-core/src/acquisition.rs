use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};
use zip::ZipArchive;

use crate::config::{AcquisitionConfig, DatasetConfig};

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{command}' exited with status {status:?} after {attempts} attempt(s): {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        attempts: u32,
        stderr: String,
    },

    #[error("expected file {0} does not exist")]
    MissingFile(PathBuf),

    #[error("archive entry '{0}' would extract outside the destination")]
    UnsafeEntry(String),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> AcquisitionError + '_ {
    move |source| AcquisitionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Seam over child-process execution.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(CommandOutput {
            status: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Linear backoff: the wait after attempt `n` is `n * backoff`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl From<&AcquisitionConfig> for RetryPolicy {
    fn from(config: &AcquisitionConfig) -> Self {
        RetryPolicy::new(config.max_attempts, config.backoff())
    }
}

/// Runs a command until it exits successfully or the policy is exhausted.
/// Launch failures (e.g. the program is not on PATH) are not retried.
pub async fn run_checked(
    runner: &dyn CommandRunner,
    policy: &RetryPolicy,
    program: &str,
    args: &[String],
) -> Result<CommandOutput, AcquisitionError> {
    let command = std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");

    let mut attempt = 0;
    loop {
        attempt += 1;
        let output = runner
            .run(program, args)
            .await
            .map_err(|source| AcquisitionError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if output.success {
            info!(%command, attempt, "command succeeded");
            return Ok(output);
        }

        if attempt >= policy.max_attempts {
            return Err(AcquisitionError::CommandFailed {
                command,
                status: output.status,
                attempts: attempt,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let delay = policy.delay_after(attempt);
        warn!(
            %command,
            attempt,
            status = ?output.status,
            stderr = %output.stderr.trim(),
            delay_ms = delay.as_millis() as u64,
            "command failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Download, unzip and move the dataset file into storage.
pub struct DatasetFetcher<R> {
    runner: R,
    dataset: DatasetConfig,
    program: String,
    policy: RetryPolicy,
}

impl<R: CommandRunner> DatasetFetcher<R> {
    pub fn new(runner: R, dataset: DatasetConfig, acquisition: &AcquisitionConfig) -> Self {
        Self {
            runner,
            dataset,
            program: acquisition.program.clone(),
            policy: RetryPolicy::from(acquisition),
        }
    }

    pub fn dataset(&self) -> &DatasetConfig {
        &self.dataset
    }

    /// Downloads the dataset archive into the scratch directory.
    pub async fn download(&self) -> Result<PathBuf, AcquisitionError> {
        let scratch = &self.dataset.scratch_dir;
        fs::create_dir_all(scratch).map_err(io_error(scratch))?;

        let args = vec![
            "datasets".to_string(),
            "download".to_string(),
            "-d".to_string(),
            self.dataset.id.clone(),
            "-p".to_string(),
            scratch.display().to_string(),
        ];
        run_checked(&self.runner, &self.policy, &self.program, &args).await?;

        let archive = self.dataset.archive_path();
        if !archive.is_file() {
            return Err(AcquisitionError::MissingFile(archive));
        }
        info!(dataset = %self.dataset.id, archive = %archive.display(), "dataset downloaded");
        Ok(archive)
    }

    /// Output of `kaggle datasets list`, used to verify the credentials work.
    pub async fn list_datasets(&self) -> Result<String, AcquisitionError> {
        let args = vec!["datasets".to_string(), "list".to_string()];
        let output = run_checked(&self.runner, &self.policy, &self.program, &args).await?;
        Ok(output.stdout)
    }

    /// Runs the whole acquisition and returns the stored CSV path.
    pub async fn acquire(&self) -> Result<PathBuf, AcquisitionError> {
        let archive = self.download().await?;
        let scratch = self.dataset.scratch_dir.clone();
        let extracted = extract_archive(&archive, &scratch)?;
        info!(files = extracted.len(), "archive extracted");

        let file = scratch.join(&self.dataset.file);
        relocate(&file, &self.dataset.storage_dir)
    }
}

/// Extracts every entry of a zip archive under `dest`, overwriting existing
/// files. Returns the extracted file paths.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>, AcquisitionError> {
    if !archive.is_file() {
        return Err(AcquisitionError::MissingFile(archive.to_path_buf()));
    }
    let file = File::open(archive).map_err(io_error(archive))?;
    let mut zip = ZipArchive::new(file)?;
    fs::create_dir_all(dest).map_err(io_error(dest))?;

    let mut extracted = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| AcquisitionError::UnsafeEntry(entry.name().to_string()))?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(io_error(&target))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let mut out = File::create(&target).map_err(io_error(&target))?;
        io::copy(&mut entry, &mut out).map_err(io_error(&target))?;
        extracted.push(target);
    }
    Ok(extracted)
}

/// Moves `file` into `storage_dir`, replacing any previous copy.
pub fn relocate(file: &Path, storage_dir: &Path) -> Result<PathBuf, AcquisitionError> {
    if !file.is_file() {
        return Err(AcquisitionError::MissingFile(file.to_path_buf()));
    }
    fs::create_dir_all(storage_dir).map_err(io_error(storage_dir))?;

    let name = file
        .file_name()
        .ok_or_else(|| AcquisitionError::MissingFile(file.to_path_buf()))?;
    let target = storage_dir.join(name);

    if fs::rename(file, &target).is_err() {
        // Rename cannot cross filesystems.
        fs::copy(file, &target).map_err(io_error(&target))?;
        fs::remove_file(file).map_err(io_error(file))?;
    }
    info!(from = %file.display(), to = %target.display(), "moved dataset file into storage");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    use zip::write::FileOptions;
    use zip::ZipWriter;

    struct ScriptedRunner {
        responses: Mutex<Vec<io::Result<CommandOutput>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn new(responses: Vec<io::Result<CommandOutput>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().cloned());
            self.calls.lock().unwrap().push(call);
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn exit(code: i32) -> io::Result<CommandOutput> {
        Ok(CommandOutput {
            status: Some(code),
            success: code == 0,
            stdout: if code == 0 { "ok".into() } else { String::new() },
            stderr: if code == 0 { String::new() } else { "401 Unauthorized".into() },
        })
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn retries_until_success() {
        let runner = ScriptedRunner::new(vec![exit(1), exit(1), exit(0)]);
        let output = run_checked(&runner, &policy(3), "kaggle", &args(&["datasets", "list"]))
            .await
            .expect("third attempt succeeds");
        assert_eq!(output.stdout, "ok");
        assert_eq!(runner.call_count(), 3);
    }

    #[tokio::test]
    async fn reports_failure_after_last_attempt() {
        let runner = ScriptedRunner::new(vec![exit(1), exit(2)]);
        let err = run_checked(&runner, &policy(2), "kaggle", &args(&["datasets", "list"]))
            .await
            .expect_err("both attempts fail");
        match err {
            AcquisitionError::CommandFailed {
                command,
                status,
                attempts,
                stderr,
            } => {
                assert_eq!(command, "kaggle datasets list");
                assert_eq!(status, Some(2));
                assert_eq!(attempts, 2);
                assert_eq!(stderr, "401 Unauthorized");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_not_retried() {
        let runner = ScriptedRunner::new(vec![Err(io::Error::new(
            io::ErrorKind::NotFound,
            "no such file",
        ))]);
        let err = run_checked(&runner, &policy(3), "kaggle", &[])
            .await
            .expect_err("spawn fails");
        assert!(matches!(err, AcquisitionError::Spawn { .. }));
        assert_eq!(runner.call_count(), 1);
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn extracts_archive_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("sales-orders.zip");
        write_zip(&archive, &[("sales_data.csv", "a,b\n1,2\n")]);

        let files = extract_archive(&archive, dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("sales_data.csv")]);
        assert_eq!(
            fs::read_to_string(dir.path().join("sales_data.csv")).unwrap(),
            "a,b\n1,2\n"
        );
    }

    #[test]
    fn rejects_entries_escaping_destination() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../outside.csv", "x")]);

        let dest = dir.path().join("out");
        let err = extract_archive(&archive, &dest).expect_err("zip slip");
        assert!(matches!(err, AcquisitionError::UnsafeEntry(_)));
        assert!(!dir.path().join("outside.csv").exists());
    }

    #[test]
    fn relocate_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = relocate(&dir.path().join("missing.csv"), &dir.path().join("store"))
            .expect_err("nothing to move");
        assert!(matches!(err, AcquisitionError::MissingFile(_)));
    }

    #[test]
    fn relocate_moves_file_into_storage() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sales_data.csv");
        fs::write(&source, "x").unwrap();
        let storage = dir.path().join("filestore").join("tables");

        let moved = relocate(&source, &storage).unwrap();
        assert_eq!(moved, storage.join("sales_data.csv"));
        assert!(moved.is_file());
        assert!(!source.exists());
    }

    /// Creates the archive the real CLI would have downloaded.
    struct DownloadingRunner {
        scratch: PathBuf,
    }

    #[async_trait]
    impl CommandRunner for DownloadingRunner {
        async fn run(&self, _program: &str, args: &[String]) -> io::Result<CommandOutput> {
            if args.first().map(String::as_str) == Some("datasets")
                && args.get(1).map(String::as_str) == Some("download")
            {
                write_zip(
                    &self.scratch.join("sales-orders.zip"),
                    &[("sales_data.csv", "h\n1\n")],
                );
            }
            exit(0)
        }
    }

    #[tokio::test]
    async fn acquire_downloads_extracts_and_moves() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = DatasetConfig {
            scratch_dir: dir.path().join("scratch"),
            storage_dir: dir.path().join("filestore"),
            ..DatasetConfig::default()
        };
        let runner = DownloadingRunner {
            scratch: dataset.scratch_dir.clone(),
        };
        let fetcher = DatasetFetcher::new(runner, dataset, &AcquisitionConfig::default());

        let stored = fetcher.acquire().await.expect("acquire failed");
        assert_eq!(stored, dir.path().join("filestore").join("sales_data.csv"));
        assert_eq!(fs::read_to_string(stored).unwrap(), "h\n1\n");
    }

    #[tokio::test]
    async fn download_without_archive_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = DatasetConfig {
            scratch_dir: dir.path().to_path_buf(),
            ..DatasetConfig::default()
        };
        let runner = ScriptedRunner::new(vec![exit(0)]);
        let fetcher = DatasetFetcher::new(runner, dataset, &AcquisitionConfig::default());

        let err = fetcher.download().await.expect_err("no archive was produced");
        assert!(matches!(err, AcquisitionError::MissingFile(_)));
    }
}
