//! Signal trap registry
//!
//! At most one handler command per condition, and registering over an
//! existing one is an error rather than an overwrite. Registering a real
//! signal installs the flag-recording OS handler and saves the previous
//! disposition; clearing puts that disposition back. Nothing heavier than
//! an atomic store happens in signal context: the executor drains the
//! recorded flags at command boundaries and runs handlers through the
//! ordinary execution path. The `EXIT` pseudo-signal never touches the
//! OS; its handler runs once when the session closes.
//!
//! Dispositions are process-global state, so the registry assumes it is
//! the only shell in the process.

pub(crate) mod signal;

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::error::TrapError;

pub use signal::SignalSpec;

struct TrapEntry {
    command: String,
    saved: signal::SavedAction,
}

/// Registered trap handlers plus the saved dispositions behind them.
#[derive(Default)]
pub struct TrapRegistry {
    /// Signal traps keyed by number; BTreeMap keeps listings sorted.
    handlers: BTreeMap<i32, TrapEntry>,
    exit_handler: Option<String>,
    /// Signals whose handler is currently executing; re-deliveries are
    /// deferred to the next boundary instead of recursing.
    dispatching: HashSet<i32>,
    /// Session-default dispositions installed at startup (the INT
    /// shield), restored after every trap disposition on drop.
    shield: Vec<signal::SavedAction>,
}

impl TrapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `command` to run when `spec` is delivered.
    pub fn register(
        &mut self,
        spec: SignalSpec,
        command: impl Into<String>,
    ) -> Result<(), TrapError> {
        let command = command.into();
        if command.is_empty() {
            return Err(TrapError::EmptyCommand);
        }
        self.check_registrable(spec)?;
        self.commit(spec, command)
    }

    /// Register one command for several conditions, all-or-nothing: if
    /// any spec is rejected, none of them is registered.
    pub fn register_all(&mut self, specs: &[SignalSpec], command: &str) -> Result<(), TrapError> {
        if command.is_empty() {
            return Err(TrapError::EmptyCommand);
        }
        let mut seen = HashSet::new();
        for &spec in specs {
            self.check_registrable(spec)?;
            if !seen.insert(spec) {
                return Err(TrapError::DuplicateTrap(spec.to_string()));
            }
        }
        let mut committed: Vec<SignalSpec> = Vec::new();
        for &spec in specs {
            if let Err(err) = self.commit(spec, command.to_string()) {
                // Roll back so a partial install never leaks out
                for &done in &committed {
                    self.clear(done);
                }
                return Err(err);
            }
            committed.push(spec);
        }
        Ok(())
    }

    /// Remove the trap for `spec`, restoring the disposition that was in
    /// place before it was registered. Clearing an untrapped condition is
    /// a no-op.
    pub fn clear(&mut self, spec: SignalSpec) {
        match spec {
            SignalSpec::Exit => {
                self.exit_handler = None;
            }
            SignalSpec::Signal(number) => {
                if let Some(entry) = self.handlers.remove(&number) {
                    if let Err(err) = signal::restore(&entry.saved) {
                        warn!(signal = %spec, error = %err, "failed to restore signal disposition");
                    }
                }
            }
        }
    }

    /// The handler registered for `spec`, if any.
    pub fn handler(&self, spec: SignalSpec) -> Option<&str> {
        match spec {
            SignalSpec::Exit => self.exit_handler.as_deref(),
            SignalSpec::Signal(number) => {
                self.handlers.get(&number).map(|entry| entry.command.as_str())
            }
        }
    }

    /// All registered traps: signals in ascending number order, `EXIT`
    /// last.
    pub fn list(&self) -> Vec<(SignalSpec, &str)> {
        let mut entries: Vec<(SignalSpec, &str)> = self
            .handlers
            .iter()
            .map(|(&number, entry)| (SignalSpec::Signal(number), entry.command.as_str()))
            .collect();
        if let Some(handler) = &self.exit_handler {
            entries.push((SignalSpec::Exit, handler.as_str()));
        }
        entries
    }

    fn check_registrable(&self, spec: SignalSpec) -> Result<(), TrapError> {
        if spec.is_uncatchable() {
            return Err(TrapError::UncatchableSignal(spec.to_string()));
        }
        if spec.is_reserved() {
            return Err(TrapError::ReservedSignal(spec.to_string()));
        }
        match spec {
            SignalSpec::Exit => {
                if self.exit_handler.is_some() {
                    return Err(TrapError::DuplicateTrap(spec.to_string()));
                }
            }
            SignalSpec::Signal(number) => {
                if !(1..=signal::MAX_SIGNAL).contains(&number) {
                    return Err(TrapError::InvalidSignal(spec.to_string()));
                }
                if self.handlers.contains_key(&number) {
                    return Err(TrapError::DuplicateTrap(spec.to_string()));
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self, spec: SignalSpec, command: String) -> Result<(), TrapError> {
        match spec {
            SignalSpec::Exit => {
                self.exit_handler = Some(command);
            }
            SignalSpec::Signal(number) => {
                let saved = signal::install(number).map_err(|source| TrapError::InstallFailed {
                    spec: spec.to_string(),
                    source,
                })?;
                self.handlers.insert(number, TrapEntry { command, saved });
            }
        }
        debug!(signal = %spec, "trap registered");
        Ok(())
    }

    /// Install the session's own flag-recording disposition for `signum`
    /// without registering a handler. Children still receive the signal
    /// normally; the session itself survives and discards the flag at
    /// the next boundary if no trap is registered by then.
    pub(crate) fn install_shield(&mut self, signum: i32) {
        match signal::install(signum) {
            Ok(saved) => self.shield.push(saved),
            Err(err) => warn!(signum, error = %err, "failed to install signal shield"),
        }
    }

    /// Signals delivered since the last boundary that have a handler,
    /// paired with the handler command. Deliveries for signals whose
    /// handler is mid-execution are left pending for the next boundary;
    /// deliveries with no handler are discarded.
    pub(crate) fn drain_pending(&mut self) -> Vec<(SignalSpec, String)> {
        let mut pending = Vec::new();
        for signum in signal::take_caught() {
            if self.dispatching.contains(&signum) {
                signal::rearm(signum);
                continue;
            }
            if let Some(entry) = self.handlers.get(&signum) {
                pending.push((SignalSpec::Signal(signum), entry.command.clone()));
            } else {
                debug!(signum, "discarding signal with no trap");
            }
        }
        pending
    }

    /// Mark `spec`'s handler as executing. Returns false if it already
    /// is, in which case the caller must skip dispatch.
    pub(crate) fn begin_dispatch(&mut self, spec: SignalSpec) -> bool {
        match spec {
            SignalSpec::Exit => true,
            SignalSpec::Signal(number) => self.dispatching.insert(number),
        }
    }

    pub(crate) fn end_dispatch(&mut self, spec: SignalSpec) {
        if let SignalSpec::Signal(number) = spec {
            self.dispatching.remove(&number);
        }
    }

    /// Take the EXIT handler, leaving none behind; the session calls this
    /// exactly once during close.
    pub(crate) fn take_exit_handler(&mut self) -> Option<String> {
        self.exit_handler.take()
    }
}

impl Drop for TrapRegistry {
    fn drop(&mut self) {
        // Trap dispositions go back first (each restores to whatever was
        // underneath, possibly the shield), then the shield itself.
        for entry in self.handlers.values() {
            if let Err(err) = signal::restore(&entry.saved) {
                warn!(signum = entry.saved.signum(), error = %err, "failed to restore signal disposition");
            }
        }
        for saved in self.shield.iter().rev() {
            if let Err(err) = signal::restore(saved) {
                warn!(signum = saved.signum(), error = %err, "failed to restore shield disposition");
            }
        }
    }
}
