//! PipeKit - POSIX-style pipeline execution engine
//!
//! Part of the Everruns ecosystem.
//!
//! PipeKit turns parsed command pipelines into real child processes:
//! it wires inter-segment pipes, applies `>`/`>>`/`<` redirections with
//! last-wins semantics, tracks the `errexit`/`xtrace`/`pipefail` shell
//! options, and delivers `trap` handlers at command boundaries without
//! doing any work inside signal context.
//!
//! # Example
//!
//! ```rust
//! use pipekit::Session;
//!
//! #[tokio::main]
//! async fn main() -> pipekit::Result<()> {
//!     let mut session = Session::new();
//!     let result = session.run_str("true && echo ready > /dev/null").await?;
//!     assert_eq!(result.code(), 0);
//!     session.close().await;
//!     Ok(())
//! }
//! ```

mod builtins;
mod error;
mod exec;
mod options;
mod parse;
mod pipeline;
mod redirect;
mod trap;

pub use error::{Error, OptionError, RedirectionError, Result, TrapError};
pub use exec::ExecuteResult;
pub use options::{ShellOption, ShellOptions};
pub use parse::{PipelineParser, WordSplitParser};
pub use pipeline::{
    AndOrList, AndOrOp, ExitCodeTrace, Pipeline, PipelineSegment, Redirection, RedirectionKind,
};
pub use trap::{SignalSpec, TrapRegistry};

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

/// One shell session: options, traps, and the execution state behind
/// `$?`.
///
/// A session owns the process-global signal dispositions its traps
/// install, so run one per process. Call [`Session::close`] when done;
/// that is what runs the `EXIT` trap.
pub struct Session {
    pub(crate) options: ShellOptions,
    pub(crate) traps: TrapRegistry,
    pub(crate) parser: Arc<dyn PipelineParser>,
    pub(crate) env: HashMap<String, String>,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) last_status: i32,
    pub(crate) last_trace: ExitCodeTrace,
    pub(crate) trace_writer: Box<dyn Write + Send>,
    closed: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a session with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a SessionBuilder for customized configuration.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Parse a line and run each of its statements in order.
    ///
    /// Stops early when a statement asks the session to exit. An empty
    /// line leaves the last status untouched.
    pub async fn run_str(&mut self, input: &str) -> Result<ExecuteResult> {
        let parser = Arc::clone(&self.parser);
        let lists = parser.parse(input)?;
        let mut result = ExecuteResult::Continue(self.last_status);
        for list in &lists {
            result = self.run_and_or(list).await?;
            if result.is_exit() {
                return Ok(result);
            }
        }
        Ok(result)
    }

    pub fn options(&self) -> &ShellOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut ShellOptions {
        &mut self.options
    }

    pub fn traps(&self) -> &TrapRegistry {
        &self.traps
    }

    pub fn traps_mut(&mut self) -> &mut TrapRegistry {
        &mut self.traps
    }

    /// Status of the most recently executed command (the `$?` analogue).
    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    /// Per-segment exit codes of the most recent pipeline, left to right.
    pub fn last_exit_codes(&self) -> &[i32] {
        self.last_trace.codes()
    }

    /// Tear the session down, running the `EXIT` trap exactly once.
    ///
    /// Returns the status the process should exit with: the last
    /// command's status, or whatever an `exit` inside the `EXIT` handler
    /// asked for. Handler failures are reported and do not block
    /// shutdown.
    pub async fn close(mut self) -> i32 {
        self.closed = true;
        let final_status = self.last_status;
        if let Some(handler) = self.traps.take_exit_handler() {
            debug!("running EXIT trap");
            match self.run_handler(&handler).await {
                Ok(result) if result.is_exit() => return result.code(),
                Ok(_) => {}
                Err(err) => {
                    eprintln!("pipekit: EXIT trap: {err}");
                    warn!(error = %err, "EXIT trap failed");
                }
            }
        }
        final_status
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Dropping also tears down the trap registry, which restores
        // every signal disposition; only the EXIT trap needs close()
        if !self.closed && self.traps.handler(SignalSpec::Exit).is_some() {
            warn!("session dropped without close(); EXIT trap not run");
        }
    }
}

/// Builder for customized Session configuration.
#[derive(Default)]
pub struct SessionBuilder {
    options: ShellOptions,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    parser: Option<Arc<dyn PipelineParser>>,
    trace_writer: Option<Box<dyn Write + Send>>,
}

impl SessionBuilder {
    /// Set an environment variable for spawned commands.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory for spawned commands.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Preset a shell option, as if `set` had been run.
    pub fn option(mut self, option: ShellOption, enabled: bool) -> Self {
        self.options.set(option, enabled);
        self
    }

    /// Replace the built-in word-split parser.
    pub fn parser(mut self, parser: Arc<dyn PipelineParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Redirect the xtrace stream somewhere other than stderr.
    pub fn trace_writer(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.trace_writer = Some(writer);
        self
    }

    /// Build the Session instance.
    ///
    /// Installs the session's own `SIGINT` disposition, so Ctrl+C
    /// reaches the foreground children without killing the session.
    pub fn build(self) -> Session {
        let mut traps = TrapRegistry::new();
        traps.install_shield(libc::SIGINT);
        Session {
            options: self.options,
            traps,
            parser: self
                .parser
                .unwrap_or_else(|| Arc::new(WordSplitParser::new())),
            env: self.env,
            cwd: self.cwd,
            last_status: 0,
            last_trace: ExitCodeTrace::new(),
            trace_writer: self.trace_writer.unwrap_or_else(|| Box::new(io::stderr())),
            closed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::sync::Mutex;

    /// Cloneable sink for capturing the xtrace stream in tests.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_run_true() {
        let mut session = Session::new();
        let result = session.run_str("true").await.unwrap();
        assert_eq!(result, ExecuteResult::Continue(0));
        assert_eq!(session.last_status(), 0);
    }

    #[tokio::test]
    #[serial]
    async fn test_run_false() {
        let mut session = Session::new();
        let result = session.run_str("false").await.unwrap();
        assert_eq!(result, ExecuteResult::Continue(1));
        assert_eq!(session.last_status(), 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_command_not_found_is_127() {
        let mut session = Session::new();
        let result = session.run_str("definitely-not-a-command-4a1b").await.unwrap();
        assert_eq!(result, ExecuteResult::Continue(127));
    }

    #[tokio::test]
    #[serial]
    async fn test_pipeline_reports_last_segment() {
        let mut session = Session::new();
        let result = session.run_str("false | true").await.unwrap();
        assert_eq!(result, ExecuteResult::Continue(0));
        assert_eq!(session.last_exit_codes(), &[1, 0]);
    }

    #[tokio::test]
    #[serial]
    async fn test_pipefail_reports_first_failure() {
        let mut session = Session::builder()
            .option(ShellOption::Pipefail, true)
            .build();
        let result = session.run_str("false | true").await.unwrap();
        assert_eq!(result, ExecuteResult::Continue(1));
    }

    #[tokio::test]
    #[serial]
    async fn test_and_short_circuits() {
        let mut session = Session::new();
        let result = session.run_str("false && true").await.unwrap();
        assert_eq!(result, ExecuteResult::Continue(1));

        let result = session.run_str("false || true").await.unwrap();
        assert_eq!(result, ExecuteResult::Continue(0));
    }

    #[tokio::test]
    #[serial]
    async fn test_exit_builtin_terminates() {
        let mut session = Session::new();
        let result = session.run_str("exit 5").await.unwrap();
        assert_eq!(result, ExecuteResult::Exit(5));
    }

    #[tokio::test]
    #[serial]
    async fn test_exit_defaults_to_last_status() {
        let mut session = Session::new();
        session.run_str("false").await.unwrap();
        let result = session.run_str("exit").await.unwrap();
        assert_eq!(result, ExecuteResult::Exit(1));
    }

    #[tokio::test]
    #[serial]
    async fn test_errexit_terminates_on_failure() {
        let mut session = Session::builder()
            .option(ShellOption::Errexit, true)
            .build();
        let result = session.run_str("false").await.unwrap();
        assert_eq!(result, ExecuteResult::Exit(1));
    }

    #[tokio::test]
    #[serial]
    async fn test_errexit_exempts_chain_operands() {
        let mut session = Session::builder()
            .option(ShellOption::Errexit, true)
            .build();
        // Every operand of a chain is a conditional context
        let result = session.run_str("false || true").await.unwrap();
        assert_eq!(result, ExecuteResult::Continue(0));
        let result = session.run_str("true && false").await.unwrap();
        assert_eq!(result, ExecuteResult::Continue(1));
    }

    #[tokio::test]
    #[serial]
    async fn test_errexit_exempts_negation() {
        let mut session = Session::builder()
            .option(ShellOption::Errexit, true)
            .build();
        let result = session.run_str("! true").await.unwrap();
        assert_eq!(result, ExecuteResult::Continue(1));
    }

    #[tokio::test]
    #[serial]
    async fn test_negation_inverts_status() {
        let mut session = Session::new();
        assert_eq!(
            session.run_str("! false").await.unwrap(),
            ExecuteResult::Continue(0)
        );
        assert_eq!(
            session.run_str("! true").await.unwrap(),
            ExecuteResult::Continue(1)
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_run_condition_exempts_errexit() {
        let mut session = Session::builder()
            .option(ShellOption::Errexit, true)
            .build();
        let lists = WordSplitParser::new().parse("false").unwrap();
        let result = session.run_condition(&lists[0]).await.unwrap();
        assert_eq!(result, ExecuteResult::Continue(1));
        assert_eq!(session.options().conditional_depth(), 0);
    }

    #[tokio::test]
    #[serial]
    async fn test_xtrace_writes_one_line_per_segment() {
        let sink = SharedBuf::default();
        let mut session = Session::builder()
            .option(ShellOption::Xtrace, true)
            .trace_writer(Box::new(sink.clone()))
            .build();
        session.run_str("true | false").await.unwrap();
        assert_eq!(sink.contents(), "+ true\n+ false\n");
    }

    #[tokio::test]
    #[serial]
    async fn test_xtrace_set_via_command() {
        let sink = SharedBuf::default();
        let mut session = Session::builder()
            .trace_writer(Box::new(sink.clone()))
            .build();
        session.run_str("set -x ; true").await.unwrap();
        assert_eq!(sink.contents(), "+ true\n");
    }

    #[tokio::test]
    #[serial]
    async fn test_set_builtin_toggles_options() {
        let mut session = Session::new();
        session.run_str("set -eo pipefail").await.unwrap();
        assert!(session.options().is_enabled(ShellOption::Errexit));
        assert!(session.options().is_enabled(ShellOption::Pipefail));
        session.run_str("set +e").await.unwrap();
        assert!(!session.options().is_enabled(ShellOption::Errexit));
    }

    #[tokio::test]
    #[serial]
    async fn test_parse_error_surfaces() {
        let mut session = Session::new();
        let err = session.run_str("a && && b").await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    #[serial]
    async fn test_empty_input_keeps_last_status() {
        let mut session = Session::new();
        session.run_str("false").await.unwrap();
        let result = session.run_str("   ").await.unwrap();
        assert_eq!(result, ExecuteResult::Continue(1));
        assert_eq!(session.last_status(), 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_close_returns_last_status() {
        let mut session = Session::new();
        session.run_str("false").await.unwrap();
        assert_eq!(session.close().await, 1);
    }
}
