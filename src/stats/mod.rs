//! External statistics scripts
//!
//! Statistical filters hand their input to a script run by an interpreter:
//!
//! ```text
//! <interpreter> <script> <input.tsv> <output.tsv> <thresholds...>
//! ```
//!
//! The call is synchronous for the filter, but the child is polled so a
//! cancelled run kills it instead of waiting for it to finish.

pub mod table;

pub use table::{SiteStatistic, Statistics, read_statistics, write_records};

use crate::config::StatsConfig;
use crate::store::Interrupted;
use anyhow::{Context, Result, bail};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Runs statistics scripts with a resolved interpreter
#[derive(Debug, Clone)]
pub struct StatsRunner {
    interpreter: PathBuf,
    poll_interval: Duration,
}

impl StatsRunner {
    /// Resolve the configured interpreter on PATH
    pub fn new(config: &StatsConfig) -> Result<Self> {
        let interpreter = which::which(&config.interpreter).with_context(|| {
            format!(
                "Statistics interpreter '{}' not found; set stats.interpreter",
                config.interpreter
            )
        })?;
        tracing::debug!("Using statistics interpreter {}", interpreter.display());
        Ok(Self {
            interpreter,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Run `script` and wait for it, killing it if `cancel` fires
    pub fn run(
        &self,
        script: &Path,
        input: &Path,
        output: &Path,
        thresholds: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !script.is_file() {
            bail!("Statistics script not found: {}", script.display());
        }

        let started = Instant::now();
        let mut child = Command::new(&self.interpreter)
            .arg(script)
            .arg(input)
            .arg(output)
            .args(thresholds)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", self.interpreter.display()))?;

        // stderr is drained on its own thread while the child runs
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buffer = String::new();
                let _ = pipe.read_to_string(&mut buffer);
                buffer
            })
        });

        let status = loop {
            if cancel.is_cancelled() {
                tracing::debug!("Killing statistics script {} after cancellation", script.display());
                let _ = child.kill();
                let _ = child.wait();
                return Err(Interrupted.into());
            }
            match child.try_wait().context("Failed to poll statistics script")? {
                Some(status) => break status,
                None => std::thread::sleep(self.poll_interval),
            }
        };

        if !status.success() {
            let stderr = stderr_reader
                .and_then(|reader| reader.join().ok())
                .unwrap_or_default();
            let stderr = stderr.trim();
            bail!(
                "Statistics script {} failed with {}{}",
                script.display(),
                status,
                if stderr.is_empty() {
                    String::new()
                } else {
                    format!(": {stderr}")
                }
            );
        }
        if !output.is_file() {
            bail!(
                "Statistics script {} produced no output at {}",
                script.display(),
                output.display()
            );
        }

        tracing::debug!(
            "Statistics script {} finished in {:?}",
            script.display(),
            started.elapsed()
        );
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;

    fn runner() -> StatsRunner {
        StatsRunner::new(&StatsConfig {
            interpreter: "sh".to_string(),
            poll_interval_ms: 5,
        })
        .unwrap()
    }

    fn script(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{body}").unwrap();
        file
    }

    #[test]
    fn test_missing_interpreter_is_reported() {
        let err = StatsRunner::new(&StatsConfig {
            interpreter: "definitely-not-an-interpreter-xyz".to_string(),
            poll_interval_ms: 5,
        })
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_success_passes_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.tsv");
        let script = script(r#"printf 'chr1\t1\t%s\n' "$3" > "$2""#);

        runner()
            .run(
                script.path(),
                Path::new("in.tsv"),
                &output,
                &["0.05".to_string()],
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "chr1\t1\t0.05\n");
    }

    #[test]
    fn test_nonzero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = script("echo broken >&2; exit 3");
        let err = runner()
            .run(
                script.path(),
                Path::new("in.tsv"),
                &dir.path().join("out.tsv"),
                &[],
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_missing_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = script("exit 0");
        let err = runner()
            .run(
                script.path(),
                Path::new("in.tsv"),
                &dir.path().join("out.tsv"),
                &[],
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("no output"));
    }

    #[test]
    fn test_cancellation_kills_the_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = script("sleep 30");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });

        let started = Instant::now();
        let err = runner()
            .run(script.path(), Path::new("in.tsv"), &dir.path().join("o"), &[], &cancel)
            .unwrap_err();
        assert!(err.is::<Interrupted>());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
