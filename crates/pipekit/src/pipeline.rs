//! Pipeline data model
//!
//! Types describing one parsed command line: pipelines of segments with
//! their redirections, and the and-or lists connecting pipelines. The
//! engine consumes these from an external parser (or the bundled
//! [`WordSplitParser`](crate::WordSplitParser)) and discards them after
//! execution; only the trap registry and option state outlive a command.

use std::fmt;

use crate::error::{Error, Result};

/// Types of redirections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectionKind {
    /// > - create or truncate the target, then write
    Output,
    /// >> - create if needed, append
    Append,
    /// < - read from an existing file
    Input,
}

impl RedirectionKind {
    /// Whether this redirection replaces the segment's stdin rather than
    /// its stdout.
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input)
    }
}

/// A single redirection directive.
///
/// `path` is non-empty for any value produced by
/// [`PipelineSegment::from_tokens`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub kind: RedirectionKind,
    pub path: String,
}

impl Redirection {
    pub fn new(kind: RedirectionKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// One command in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSegment {
    /// Program name, resolved against PATH at spawn time. Never empty.
    pub program: String,
    /// Arguments, excluding the program name.
    pub args: Vec<String>,
    /// Position within the pipeline, 0-based.
    pub index: usize,
    /// Redirections in source order; the last one per direction wins.
    pub redirections: Vec<Redirection>,
}

impl PipelineSegment {
    pub fn new(program: impl Into<String>, args: Vec<String>, index: usize) -> Self {
        Self {
            program: program.into(),
            args,
            index,
            redirections: Vec::new(),
        }
    }

    /// Assemble a segment from already-split tokens.
    ///
    /// Recognizes `>`, `>>`, and `<` either as standalone tokens followed
    /// by a path token or glued to their path (`>out.txt`). Quote removal
    /// happens before this sees the tokens, so a quoted `">f"` argument is
    /// indistinguishable from a redirection; full quoting semantics belong
    /// to the external parser.
    pub fn from_tokens(tokens: &[String], index: usize) -> Result<Self> {
        let mut program: Option<String> = None;
        let mut args = Vec::new();
        let mut redirections = Vec::new();

        let mut iter = tokens.iter();
        while let Some(token) = iter.next() {
            if token.starts_with("<<") {
                return Err(Error::Parse("here-documents are not supported".to_string()));
            }
            let (kind, rest) = if let Some(rest) = token.strip_prefix(">>") {
                (Some(RedirectionKind::Append), rest)
            } else if let Some(rest) = token.strip_prefix('>') {
                (Some(RedirectionKind::Output), rest)
            } else if let Some(rest) = token.strip_prefix('<') {
                (Some(RedirectionKind::Input), rest)
            } else {
                (None, token.as_str())
            };

            match kind {
                Some(kind) => {
                    let path = if rest.is_empty() {
                        iter.next().cloned().ok_or_else(|| {
                            Error::Parse(format!(
                                "missing redirection target after '{}'",
                                operator_str(kind)
                            ))
                        })?
                    } else {
                        rest.to_string()
                    };
                    redirections.push(Redirection::new(kind, path));
                }
                None if program.is_none() => program = Some(token.clone()),
                None => args.push(token.clone()),
            }
        }

        let program = program.ok_or_else(|| Error::Parse("missing command".to_string()))?;
        Ok(Self {
            program,
            args,
            index,
            redirections,
        })
    }
}

fn operator_str(kind: RedirectionKind) -> &'static str {
    match kind {
        RedirectionKind::Output => ">",
        RedirectionKind::Append => ">>",
        RedirectionKind::Input => "<",
    }
}

impl fmt::Display for PipelineSegment {
    /// Command as xtrace renders it: program and arguments, no
    /// redirections.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A pipeline of commands connected by `|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// Whether the pipeline is negated (`!`).
    pub negated: bool,
    /// Segments in left-to-right order. Never empty.
    pub segments: Vec<PipelineSegment>,
}

impl Pipeline {
    pub fn new(segments: Vec<PipelineSegment>) -> Self {
        Self {
            negated: false,
            segments,
        }
    }

    /// A pipeline of a single command.
    pub fn command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(vec![PipelineSegment::new(program, args, 0)])
    }
}

/// Operators connecting pipelines in an and-or list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AndOrOp {
    /// && - run the next pipeline only if the previous one succeeded
    And,
    /// || - run the next pipeline only if the previous one failed
    Or,
}

/// Pipelines connected by `&&` and `||`, evaluated with short-circuiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndOrList {
    pub first: Pipeline,
    pub rest: Vec<(AndOrOp, Pipeline)>,
}

impl AndOrList {
    /// A list of a single pipeline.
    pub fn single(pipeline: Pipeline) -> Self {
        Self {
            first: pipeline,
            rest: Vec::new(),
        }
    }
}

/// Per-execution record of segment exit codes, left to right.
///
/// Transient: built while a pipeline's children are collected, consulted
/// for the reported code, then kept only as the session's
/// `last_exit_codes` snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitCodeTrace {
    codes: Vec<i32>,
}

impl ExitCodeTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next segment's exit code.
    pub fn record(&mut self, code: i32) {
        self.codes.push(code);
    }

    /// All recorded codes in segment order.
    pub fn codes(&self) -> &[i32] {
        &self.codes
    }

    /// The pipeline's reported exit code.
    ///
    /// With `pipefail` the first non-zero code wins, scanning left to
    /// right; without it the last segment's code is reported. Empty
    /// traces report 0.
    pub fn reported(&self, pipefail: bool) -> i32 {
        if pipefail {
            self.codes.iter().copied().find(|&code| code != 0).unwrap_or(0)
        } else {
            self.codes.last().copied().unwrap_or(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_from_tokens_simple_command() {
        let segment = PipelineSegment::from_tokens(&tokens(&["echo", "hello", "world"]), 0).unwrap();
        assert_eq!(segment.program, "echo");
        assert_eq!(segment.args, vec!["hello", "world"]);
        assert!(segment.redirections.is_empty());
    }

    #[test]
    fn test_from_tokens_output_redirection() {
        let segment = PipelineSegment::from_tokens(&tokens(&["echo", "hi", ">", "out.txt"]), 0).unwrap();
        assert_eq!(segment.program, "echo");
        assert_eq!(segment.args, vec!["hi"]);
        assert_eq!(
            segment.redirections,
            vec![Redirection::new(RedirectionKind::Output, "out.txt")]
        );
    }

    #[test]
    fn test_from_tokens_glued_redirection() {
        let segment = PipelineSegment::from_tokens(&tokens(&["echo", "hi", ">out.txt"]), 0).unwrap();
        assert_eq!(
            segment.redirections,
            vec![Redirection::new(RedirectionKind::Output, "out.txt")]
        );
    }

    #[test]
    fn test_from_tokens_append_before_output() {
        // >> must be recognized before > so ">>log" is append, not ">log"
        let segment = PipelineSegment::from_tokens(&tokens(&["cmd", ">>log"]), 0).unwrap();
        assert_eq!(
            segment.redirections,
            vec![Redirection::new(RedirectionKind::Append, "log")]
        );
    }

    #[test]
    fn test_from_tokens_mixed_directions() {
        let segment =
            PipelineSegment::from_tokens(&tokens(&["sort", "<", "in.txt", ">", "out.txt"]), 2).unwrap();
        assert_eq!(segment.index, 2);
        assert_eq!(segment.redirections.len(), 2);
        assert_eq!(segment.redirections[0].kind, RedirectionKind::Input);
        assert_eq!(segment.redirections[1].kind, RedirectionKind::Output);
    }

    #[test]
    fn test_from_tokens_missing_target() {
        let err = PipelineSegment::from_tokens(&tokens(&["echo", "hi", ">"]), 0).unwrap_err();
        assert!(err.to_string().contains("missing redirection target"));
    }

    #[test]
    fn test_from_tokens_missing_command() {
        let err = PipelineSegment::from_tokens(&tokens(&[">", "out.txt"]), 0).unwrap_err();
        assert!(err.to_string().contains("missing command"));
    }

    #[test]
    fn test_segment_display_omits_redirections() {
        let segment =
            PipelineSegment::from_tokens(&tokens(&["echo", "a", "b", ">", "f"]), 0).unwrap();
        assert_eq!(segment.to_string(), "echo a b");
    }

    #[test]
    fn test_trace_default_reports_last() {
        let mut trace = ExitCodeTrace::new();
        trace.record(1);
        trace.record(0);
        assert_eq!(trace.reported(false), 0);
    }

    #[test]
    fn test_trace_pipefail_reports_first_failure() {
        let mut trace = ExitCodeTrace::new();
        trace.record(0);
        trace.record(2);
        trace.record(1);
        assert_eq!(trace.reported(true), 2);
    }

    #[test]
    fn test_trace_pipefail_all_zero() {
        let mut trace = ExitCodeTrace::new();
        trace.record(0);
        trace.record(0);
        assert_eq!(trace.reported(true), 0);
    }

    #[test]
    fn test_trace_empty_reports_zero() {
        let trace = ExitCodeTrace::new();
        assert_eq!(trace.reported(false), 0);
        assert_eq!(trace.reported(true), 0);
    }
}
