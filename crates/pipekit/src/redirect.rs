//! Redirection resolution
//!
//! Turns the redirection list of one pipeline segment into the final
//! stdin/stdout targets and opens them. Every target is opened in listed
//! order, so an early `>` truncates its file even when a later
//! redirection of the same direction supersedes it; the last open per
//! direction wins and superseded handles close as they are replaced.
//! All of this happens before any process in the pipeline is spawned.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;

use tracing::trace;

use crate::error::RedirectionError;
use crate::pipeline::{PipelineSegment, Redirection, RedirectionKind};

/// Opened redirection targets for one segment.
///
/// `None` means the segment keeps whatever the executor wires up: a pipe
/// to the neighbouring segment, or the session's own stdio at the
/// pipeline's ends.
#[derive(Debug, Default)]
pub(crate) struct ResolvedStdio {
    pub stdin: Option<File>,
    pub stdout: Option<File>,
}

/// Resolve a segment's redirections, last one per direction winning.
pub(crate) fn resolve(segment: &PipelineSegment) -> Result<ResolvedStdio, RedirectionError> {
    let mut resolved = ResolvedStdio::default();
    for redirection in &segment.redirections {
        let file = open(redirection)?;
        trace!(path = %redirection.path, kind = ?redirection.kind, "opened redirection target");
        if redirection.kind.is_input() {
            resolved.stdin = Some(file);
        } else {
            resolved.stdout = Some(file);
        }
    }
    Ok(resolved)
}

fn open(redirection: &Redirection) -> Result<File, RedirectionError> {
    let path = &redirection.path;
    let mut options = OpenOptions::new();
    match redirection.kind {
        RedirectionKind::Output => options.write(true).create(true).truncate(true).mode(0o644),
        RedirectionKind::Append => options.append(true).create(true).mode(0o644),
        RedirectionKind::Input => options.read(true),
    };
    options
        .open(path)
        .map_err(|err| RedirectionError::classify(path, err))
}
