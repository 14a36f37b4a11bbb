//! Pipeline execution
//!
//! One execution walks five stages: resolve every segment's redirections,
//! emit xtrace, spawn every child with the pipe wiring, wait for all of
//! them in order while recording exit codes, then aggregate under
//! pipefail/negation, poll for pending traps, and let errexit decide
//! whether the session keeps going.

use std::io::{self, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use crate::builtins;
use crate::error::Result;
use crate::options::ShellOption;
use crate::pipeline::{AndOrList, AndOrOp, ExitCodeTrace, Pipeline, PipelineSegment};
use crate::redirect::{self, ResolvedStdio};
use crate::Session;

/// Outcome of one executed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteResult {
    /// The command finished with this status; the session keeps going.
    Continue(i32),
    /// The session must terminate with this status: the `exit` builtin,
    /// errexit on a failure, or a trap handler that exited.
    Exit(i32),
}

impl ExecuteResult {
    /// The exit status, on either side.
    pub fn code(self) -> i32 {
        match self {
            Self::Continue(code) | Self::Exit(code) => code,
        }
    }

    pub fn is_exit(self) -> bool {
        matches!(self, Self::Exit(_))
    }
}

/// What became of one segment at spawn time.
enum Spawned {
    Child(Child),
    /// Never ran; carries the status it contributes to the trace.
    Skipped(i32),
}

impl Session {
    /// Run an and-or chain with short-circuit evaluation.
    ///
    /// In a chain with at least one `&&`/`||`, every operand runs as a
    /// conditional context, so a failing operand never triggers errexit;
    /// a single-pipeline list runs at ambient depth. The chain's status
    /// is the last executed pipeline's.
    pub async fn run_and_or(&mut self, list: &AndOrList) -> Result<ExecuteResult> {
        if list.rest.is_empty() {
            return self.run_pipeline(&list.first).await;
        }
        let result = self.run_exempt(&list.first).await?;
        if result.is_exit() {
            return Ok(result);
        }
        let mut status = result.code();
        for (op, pipeline) in &list.rest {
            let wanted = match op {
                AndOrOp::And => status == 0,
                AndOrOp::Or => status != 0,
            };
            if !wanted {
                continue;
            }
            let result = self.run_exempt(pipeline).await?;
            if result.is_exit() {
                return Ok(result);
            }
            status = result.code();
        }
        Ok(ExecuteResult::Continue(status))
    }

    /// Run a whole list as the test expression of an `if`/`while`/`until`
    /// construct: failures inside never trigger errexit.
    pub async fn run_condition(&mut self, list: &AndOrList) -> Result<ExecuteResult> {
        self.options.enter_conditional();
        let result = self.run_and_or(list).await;
        self.options.exit_conditional();
        result
    }

    async fn run_exempt(&mut self, pipeline: &Pipeline) -> Result<ExecuteResult> {
        self.options.enter_conditional();
        let result = self.run_pipeline(pipeline).await;
        self.options.exit_conditional();
        result
    }

    /// Execute one pipeline end to end.
    ///
    /// Every segment spawns before any is awaited. After the aggregated
    /// status is known, pending traps run, then errexit decides whether
    /// the session survives the result.
    pub async fn run_pipeline(&mut self, pipeline: &Pipeline) -> Result<ExecuteResult> {
        let status = match self.run_segments(pipeline).await? {
            ExecuteResult::Exit(code) => {
                self.last_status = code;
                return Ok(ExecuteResult::Exit(code));
            }
            ExecuteResult::Continue(status) => status,
        };
        let status = if pipeline.negated {
            if status == 0 { 1 } else { 0 }
        } else {
            status
        };
        self.last_status = status;

        // Command boundary: handlers run before errexit sees the status
        if let ExecuteResult::Exit(code) = self.dispatch_pending_traps().await? {
            return Ok(ExecuteResult::Exit(code));
        }
        if !pipeline.negated && self.options.should_exit_on(status) {
            debug!(status, "errexit: terminating session");
            return Ok(ExecuteResult::Exit(status));
        }
        Ok(ExecuteResult::Continue(status))
    }

    async fn run_segments(&mut self, pipeline: &Pipeline) -> Result<ExecuteResult> {
        // Building: every redirection resolves before anything spawns, so
        // a bad path aborts the pipeline with no processes started
        let mut resolved = Vec::with_capacity(pipeline.segments.len());
        for segment in &pipeline.segments {
            match redirect::resolve(segment) {
                Ok(stdio) => resolved.push(stdio),
                Err(err) => {
                    eprintln!("pipekit: {err}");
                    let mut trace = ExitCodeTrace::new();
                    trace.record(1);
                    self.last_trace = trace;
                    return Ok(ExecuteResult::Continue(1));
                }
            }
        }

        let count = pipeline.segments.len();
        if count == 1 && builtins::is_builtin(&pipeline.segments[0].program) {
            let stdio = resolved.pop().unwrap_or_default();
            return self.run_builtin(&pipeline.segments[0], stdio);
        }

        // Spawning: all children start before any is awaited
        let mut children: Vec<Spawned> = Vec::with_capacity(count);
        let mut carry: Option<ChildStdout> = None;
        for (segment, stdio) in pipeline.segments.iter().zip(resolved) {
            self.trace_segment(segment);

            if builtins::is_builtin(&segment.program) {
                // Session state is unreachable from a pipeline child
                eprintln!(
                    "pipekit: {}: builtin is not available in pipelines",
                    segment.program
                );
                carry = None;
                children.push(Spawned::Skipped(127));
                continue;
            }

            let is_last = segment.index + 1 == count;
            let mut command = Command::new(&segment.program);
            command.args(&segment.args);
            for (key, value) in &self.env {
                command.env(key, value);
            }
            if let Some(cwd) = &self.cwd {
                command.current_dir(cwd);
            }

            let upstream = carry.take();
            let stdin = match stdio.stdin {
                // An explicit redirection beats the pipe; dropping the
                // untaken upstream handle closes the read end
                Some(file) => Stdio::from(file),
                None => match upstream {
                    Some(pipe) => pipe.try_into()?,
                    None if segment.index == 0 => Stdio::inherit(),
                    // The producer never ran; read end of a closed pipe
                    None => Stdio::null(),
                },
            };
            command.stdin(stdin);

            if let Some(file) = stdio.stdout {
                command.stdout(Stdio::from(file));
            } else if !is_last {
                command.stdout(Stdio::piped());
            } else {
                command.stdout(Stdio::inherit());
            }

            match command.spawn() {
                Ok(mut child) => {
                    if !is_last {
                        carry = child.stdout.take();
                    }
                    children.push(Spawned::Child(child));
                }
                Err(err) => {
                    children.push(Spawned::Skipped(spawn_status(&segment.program, &err)));
                }
            }
        }

        // Collecting: wait in segment order, recording every exit code
        let mut trace = ExitCodeTrace::new();
        for spawned in children {
            let code = match spawned {
                Spawned::Child(mut child) => exit_code(child.wait().await?),
                Spawned::Skipped(status) => status,
            };
            trace.record(code);
        }
        let status = trace.reported(self.options.is_enabled(ShellOption::Pipefail));
        self.last_trace = trace;
        Ok(ExecuteResult::Continue(status))
    }

    fn run_builtin(
        &mut self,
        segment: &PipelineSegment,
        stdio: ResolvedStdio,
    ) -> Result<ExecuteResult> {
        self.trace_segment(segment);
        let result = builtins::run(
            &segment.program,
            &segment.args,
            &mut self.options,
            &mut self.traps,
            self.last_status,
        );
        if !result.stdout.is_empty() {
            match stdio.stdout {
                Some(mut file) => file.write_all(result.stdout.as_bytes())?,
                None => print!("{}", result.stdout),
            }
        }
        if !result.stderr.is_empty() {
            eprint!("{}", result.stderr);
        }
        let mut trace = ExitCodeTrace::new();
        trace.record(result.status);
        self.last_trace = trace;
        if let Some(code) = result.exit {
            return Ok(ExecuteResult::Exit(code));
        }
        Ok(ExecuteResult::Continue(result.status))
    }

    fn trace_segment(&mut self, segment: &PipelineSegment) {
        if self.options.is_enabled(ShellOption::Xtrace) {
            // Trace write failures are not the command's problem
            let _ = writeln!(self.trace_writer, "+ {segment}");
        }
    }

    /// Run every trap whose signal fired since the last boundary.
    ///
    /// The pre-delivery `$?` is preserved across each handler. A handler
    /// that calls `exit` terminates the session; any other handler
    /// failure is reported and swallowed.
    async fn dispatch_pending_traps(&mut self) -> Result<ExecuteResult> {
        for (spec, command) in self.traps.drain_pending() {
            if !self.traps.begin_dispatch(spec) {
                continue;
            }
            debug!(signal = %spec, "running trap handler");
            let saved_status = self.last_status;
            let result = self.run_handler(&command).await;
            self.traps.end_dispatch(spec);
            match result {
                Ok(ExecuteResult::Exit(code)) => return Ok(ExecuteResult::Exit(code)),
                Ok(ExecuteResult::Continue(_)) => self.last_status = saved_status,
                Err(err) => {
                    eprintln!("pipekit: {spec} trap: {err}");
                    warn!(signal = %spec, error = %err, "trap handler failed");
                    self.last_status = saved_status;
                }
            }
        }
        Ok(ExecuteResult::Continue(self.last_status))
    }

    /// Execute a handler command string through the ordinary path.
    pub(crate) async fn run_handler(&mut self, command: &str) -> Result<ExecuteResult> {
        let parser = Arc::clone(&self.parser);
        let lists = parser.parse(command)?;
        let mut result = ExecuteResult::Continue(self.last_status);
        for list in &lists {
            result = Box::pin(self.run_and_or(list)).await?;
            if result.is_exit() {
                return Ok(result);
            }
        }
        Ok(result)
    }
}

fn spawn_status(program: &str, err: &io::Error) -> i32 {
    let (status, cause) = match err.kind() {
        io::ErrorKind::NotFound => (127, "command not found".to_string()),
        io::ErrorKind::PermissionDenied => (126, "permission denied".to_string()),
        _ => (126, err.to_string()),
    };
    eprintln!("pipekit: {program}: {cause}");
    warn!(program, status, "spawn failed");
    status
}

/// 128+N for signal deaths, the way shells report them.
fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => status.signal().map_or(1, |signal| 128 + signal),
    }
}
