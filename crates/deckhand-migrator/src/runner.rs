//! Migration runner.
//!
//! Runs the schema-migration tool once in a subprocess with a clean
//! environment, bounded in time and optionally (on unix) in data-segment
//! size. Output is drained while the tool runs, so it is available for
//! diagnostics however the run ends. A non-zero exit is a failure; there
//! is no retry.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use deckhand_core::connection::DATABASE_URL_ENV;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{MigrationError, MigrationResult, combine};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Variables passed through from the runner's own environment.
const INHERITED_ENV: &[&str] = &["PATH", "HOME", "LANG"];

/// How long to wait for the output pipes to close once the tool is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Captured result of a successful migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl MigrationOutput {
    pub fn diagnostics(&self) -> String {
        combine(&self.stdout, &self.stderr)
    }
}

#[derive(Debug, Clone)]
pub struct MigrationRunner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    memory_limit_mib: Option<u64>,
    working_dir: Option<PathBuf>,
}

impl MigrationRunner {
    /// `command` is the program followed by its arguments. No memory limit
    /// is applied until [`with_memory_limit`](Self::with_memory_limit) sets one.
    pub fn new(command: &[String]) -> MigrationResult<Self> {
        let (program, args) = command.split_first().ok_or(MigrationError::EmptyCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: DEFAULT_TIMEOUT,
            memory_limit_mib: None,
            working_dir: None,
        })
    }

    /// Split a command line on whitespace.
    pub fn from_command_line(line: &str) -> MigrationResult<Self> {
        let command: Vec<String> = line.split_whitespace().map(String::from).collect();
        Self::new(&command)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cap the tool's data segment (heap and private writable mappings).
    /// Address-space reservations are not counted, so runtimes that reserve
    /// large virtual regions up front still start. `None` removes the cap.
    pub fn with_memory_limit(mut self, limit_mib: Option<u64>) -> Self {
        self.memory_limit_mib = limit_mib;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the tool once. `env` must carry the connection string.
    pub async fn run(&self, env: &BTreeMap<String, SecretString>) -> MigrationResult<MigrationOutput> {
        if !env.contains_key(DATABASE_URL_ENV) {
            return Err(MigrationError::MissingEnv(DATABASE_URL_ENV));
        }

        info!(
            program = %self.program,
            args = ?self.args,
            timeout_ms = self.timeout.as_millis() as u64,
            memory_limit_mib = ?self.memory_limit_mib,
            "running migration"
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env_clear();
        for key in INHERITED_ENV {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        for (key, value) in env {
            cmd.env(key, value.expose_secret());
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            // Own process group, so a timeout kill also reaches anything the
            // tool spawned and the output pipes close.
            cmd.process_group(0);
            if let Some(limit) = self.memory_limit_mib {
                limit_data_segment(&mut cmd, limit);
            }
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| MigrationError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let stdout = Drain::start(child.stdout.take());
        let stderr = Drain::start(child.stderr.take());

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(result) => result.map_err(MigrationError::Wait)?,
            Err(_) => {
                warn!(program = %self.program, after = ?self.timeout, "migration timed out, killing it");
                kill(&mut child).await;
                return Err(MigrationError::TimedOut {
                    after: self.timeout,
                    stdout: stdout.finish().await,
                    stderr: stderr.finish().await,
                });
            }
        };
        let elapsed = started.elapsed();

        let stdout = stdout.finish().await;
        let stderr = stderr.finish().await;
        debug!(%stdout, %stderr, "migration output");

        if !status.success() {
            if let Some(signal) = termination_signal(&status) {
                warn!(signal, elapsed_ms = elapsed.as_millis() as u64, "migration killed by signal");
                return Err(MigrationError::Signaled { signal, stdout, stderr });
            }
            let code = status.code().unwrap_or(-1);
            warn!(code, elapsed_ms = elapsed.as_millis() as u64, "migration failed");
            return Err(MigrationError::Exited { code, stdout, stderr });
        }

        info!(elapsed_ms = elapsed.as_millis() as u64, "migration succeeded");
        Ok(MigrationOutput {
            exit_code: 0,
            stdout,
            stderr,
            elapsed,
        })
    }
}

/// One output pipe, copied into a shared buffer by a background task so
/// whatever the tool wrote survives a kill.
struct Drain {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl Drain {
    fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reader = pipe.map(|mut pipe| {
            let sink = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => sink
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buffer, reader }
    }

    /// Wait briefly for end of stream, then return what was read.
    async fn finish(mut self) -> String {
        if let Some(mut reader) = self.reader.take()
            && timeout(DRAIN_GRACE, &mut reader).await.is_err()
        {
            debug!("output pipe still open after exit, keeping what was read");
            reader.abort();
        }
        let bytes = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

async fn kill(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        // SAFETY: plain kill(2) on the process group created at spawn.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    if let Err(err) = child.kill().await {
        warn!(error = %err, "failed to reap timed-out migration");
    }
}

#[cfg(unix)]
fn termination_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
fn limit_data_segment(cmd: &mut Command, limit_mib: u64) {
    let bytes = limit_mib.saturating_mul(1024 * 1024) as libc::rlim_t;
    // SAFETY: the hook runs in the forked child before exec and only calls
    // setrlimit, which is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            let limit = libc::rlimit {
                rlim_cur: bytes,
                rlim_max: bytes,
            };
            if libc::setrlimit(libc::RLIMIT_DATA, &limit) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn env() -> BTreeMap<String, SecretString> {
        BTreeMap::from([(
            DATABASE_URL_ENV.to_string(),
            SecretString::from("postgresql://svc:pw@db.local:5432/app?schema=public"),
        )])
    }

    fn sh(script: &str) -> MigrationRunner {
        MigrationRunner::new(&["sh".to_string(), "-c".to_string(), script.to_string()]).unwrap()
    }

    #[tokio::test]
    async fn captures_output_on_success() {
        let output = sh("echo applied; echo note >&2").run(&env()).await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "applied");
        assert_eq!(output.stderr.trim(), "note");
    }

    #[tokio::test]
    async fn connection_string_reaches_the_tool() {
        let output = sh("printf %s \"$DATABASE_URL\"").run(&env()).await.unwrap();
        assert_eq!(output.stdout, "postgresql://svc:pw@db.local:5432/app?schema=public");
    }

    #[tokio::test]
    async fn environment_is_clean() {
        // SAFETY: test-only variable, not read concurrently by this process.
        unsafe { std::env::set_var("DECKHAND_RUNNER_LEAK", "1") };
        let output = sh("printf %s \"${DECKHAND_RUNNER_LEAK:-unset}\"")
            .run(&env())
            .await
            .unwrap();
        assert_eq!(output.stdout, "unset");
    }

    #[tokio::test]
    async fn non_zero_exit_is_fatal() {
        let err = sh("echo 'P3009 failed migration' >&2; exit 3")
            .run(&env())
            .await
            .unwrap_err();
        match &err {
            MigrationError::Exited { code, stderr, .. } => {
                assert_eq!(*code, 3);
                assert!(stderr.contains("P3009"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.diagnostics().unwrap().contains("P3009"));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn timeout_kills_the_tool() {
        let started = Instant::now();
        let err = sh("sleep 5")
            .with_timeout(Duration::from_millis(200))
            .run(&env())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn timeout_keeps_partial_output() {
        let err = sh("echo 'applying 0001_init'; echo 'waiting for lock' >&2; sleep 5")
            .with_timeout(Duration::from_millis(500))
            .run(&env())
            .await
            .unwrap_err();
        match &err {
            MigrationError::TimedOut { after, stdout, stderr } => {
                assert_eq!(*after, Duration::from_millis(500));
                assert!(stdout.contains("applying 0001_init"));
                assert!(stderr.contains("waiting for lock"));
            }
            other => panic!("unexpected error: {other}"),
        }
        let diagnostics = err.diagnostics().unwrap();
        assert!(diagnostics.contains("applying 0001_init"));
        assert!(diagnostics.contains("waiting for lock"));
        assert_eq!(err.to_string(), "migration timed out after 500ms");
    }

    #[tokio::test]
    async fn default_runner_inherits_the_data_limit() {
        let mut inherited = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: getrlimit only writes into the struct passed to it.
        assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_DATA, &mut inherited) }, 0);
        let expected = if inherited.rlim_cur == libc::RLIM_INFINITY {
            "unlimited".to_string()
        } else {
            (inherited.rlim_cur / 1024).to_string()
        };

        let output = sh("ulimit -d").run(&env()).await.unwrap();
        assert_eq!(output.stdout.trim(), expected);
    }

    #[tokio::test]
    async fn memory_limit_bounds_the_data_segment() {
        let output = sh("ulimit -d; echo ok")
            .with_memory_limit(Some(256))
            .run(&env())
            .await
            .unwrap();
        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("262144"));
        assert_eq!(lines.next(), Some("ok"));
    }

    #[tokio::test]
    async fn signal_termination_is_reported() {
        let err = sh("echo 'starting'; kill -KILL $$").run(&env()).await.unwrap_err();
        match &err {
            MigrationError::Signaled { signal, stdout, .. } => {
                assert_eq!(*signal, libc::SIGKILL);
                assert!(stdout.contains("starting"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.exit_code(), 128 + libc::SIGKILL);
        assert_eq!(err.to_string(), "migration killed by signal 9");
    }

    #[tokio::test]
    async fn missing_connection_string_is_rejected() {
        let err = sh("true").run(&BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, MigrationError::MissingEnv("DATABASE_URL")));
    }

    #[tokio::test]
    async fn unknown_program_fails_to_spawn() {
        let runner = MigrationRunner::from_command_line("deckhand-no-such-tool --flag").unwrap();
        let err = runner.run(&env()).await.unwrap_err();
        assert!(matches!(err, MigrationError::Spawn { .. }));
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            MigrationRunner::from_command_line("   "),
            Err(MigrationError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("schema.prisma"), "model A {}").unwrap();
        let output = sh("ls").with_working_dir(dir.path()).run(&env()).await.unwrap();
        assert!(output.stdout.contains("schema.prisma"));
    }
}
