//! Signal specs and raw disposition plumbing
//!
//! [`SignalSpec`] covers everything a trap can name: POSIX signal names
//! (case-insensitive, optional `SIG` prefix), numbers, the real-time
//! range forms `RTMIN+N`/`RTMAX-N`, and the `EXIT` pseudo-signal.
//!
//! The OS side goes through `libc::sigaction` directly: the registry must
//! restore whatever disposition a signal had before a trap was installed,
//! and the real-time range has no stable names to go through a safe
//! wrapper with. The installed handler is async-signal-safe by
//! construction; it only stores into static atomics, and everything else
//! happens when the executor drains them at a command boundary.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::TrapError;

/// Highest signal number the pending-flag array covers. Linux's
/// real-time range ends at 64; specs beyond this are rejected at
/// registration.
pub(crate) const MAX_SIGNAL: i32 = 64;

/// A condition a trap can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalSpec {
    /// Runs once when the session closes; never touches any OS
    /// disposition.
    Exit,
    /// A real signal, by number.
    Signal(i32),
}

impl SignalSpec {
    /// Parse a trap condition.
    ///
    /// Accepts `EXIT` (or `0`), signal names with or without the `SIG`
    /// prefix in any case, plain numbers, and the real-time forms
    /// `RTMIN`, `RTMIN+N`, `RTMAX`, `RTMAX-N` with boundary validation.
    pub fn parse(spec: &str) -> Result<Self, TrapError> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(TrapError::InvalidSignal(spec.to_string()));
        }
        let upper = trimmed.to_ascii_uppercase();
        if upper == "EXIT" {
            return Ok(Self::Exit);
        }
        if let Ok(number) = upper.parse::<i32>() {
            // POSIX spells the exit condition 0 in numeric form
            if number == 0 {
                return Ok(Self::Exit);
            }
            return if valid_signal_number(number) {
                Ok(Self::Signal(number))
            } else {
                Err(TrapError::InvalidSignal(trimmed.to_string()))
            };
        }

        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        if let Some(result) = parse_realtime(name) {
            return result
                .map(Self::Signal)
                .map_err(|_| TrapError::InvalidSignal(trimmed.to_string()));
        }
        number_for_name(name)
            .map(Self::Signal)
            .ok_or_else(|| TrapError::InvalidSignal(trimmed.to_string()))
    }

    pub fn is_exit(self) -> bool {
        matches!(self, Self::Exit)
    }

    /// The underlying signal number, `None` for `EXIT`.
    pub fn number(self) -> Option<i32> {
        match self {
            Self::Exit => None,
            Self::Signal(number) => Some(number),
        }
    }

    /// KILL and STOP dispositions cannot be changed at all.
    pub(crate) fn is_uncatchable(self) -> bool {
        matches!(self, Self::Signal(number) if number == libc::SIGKILL || number == libc::SIGSTOP)
    }

    /// CHLD drives the async runtime's child reaper; taking it over
    /// would break every `wait` in the executor.
    pub(crate) fn is_reserved(self) -> bool {
        matches!(self, Self::Signal(number) if number == libc::SIGCHLD)
    }
}

impl fmt::Display for SignalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Exit => write!(f, "EXIT"),
            Self::Signal(number) => {
                if let Some(name) = name_for_number(number) {
                    return write!(f, "SIG{}", name);
                }
                let (rtmin, rtmax) = realtime_range();
                if number == rtmin {
                    write!(f, "SIGRTMIN")
                } else if number == rtmax {
                    write!(f, "SIGRTMAX")
                } else if number > rtmin && number < rtmax {
                    write!(f, "SIGRTMIN+{}", number - rtmin)
                } else {
                    write!(f, "SIG{}", number)
                }
            }
        }
    }
}

/// Named signals common to POSIX platforms.
const SIGNAL_TABLE: &[(&str, i32)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("ILL", libc::SIGILL),
    ("TRAP", libc::SIGTRAP),
    ("ABRT", libc::SIGABRT),
    ("BUS", libc::SIGBUS),
    ("FPE", libc::SIGFPE),
    ("KILL", libc::SIGKILL),
    ("USR1", libc::SIGUSR1),
    ("SEGV", libc::SIGSEGV),
    ("USR2", libc::SIGUSR2),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("TTIN", libc::SIGTTIN),
    ("TTOU", libc::SIGTTOU),
    ("URG", libc::SIGURG),
    ("XCPU", libc::SIGXCPU),
    ("XFSZ", libc::SIGXFSZ),
    ("VTALRM", libc::SIGVTALRM),
    ("PROF", libc::SIGPROF),
    ("WINCH", libc::SIGWINCH),
    ("IO", libc::SIGIO),
    ("SYS", libc::SIGSYS),
];

#[cfg(target_os = "linux")]
fn extra_signals() -> &'static [(&'static str, i32)] {
    // POLL aliases IO; keep it parseable but let IO win reverse lookup
    &[
        ("STKFLT", libc::SIGSTKFLT),
        ("PWR", libc::SIGPWR),
        ("POLL", libc::SIGPOLL),
    ]
}

#[cfg(not(target_os = "linux"))]
fn extra_signals() -> &'static [(&'static str, i32)] {
    &[]
}

fn number_for_name(name: &str) -> Option<i32> {
    SIGNAL_TABLE
        .iter()
        .chain(extra_signals())
        .find(|(candidate, _)| *candidate == name)
        .map(|&(_, number)| number)
}

fn name_for_number(number: i32) -> Option<&'static str> {
    SIGNAL_TABLE
        .iter()
        .chain(extra_signals())
        .find(|&&(_, candidate)| candidate == number)
        .map(|&(name, _)| name)
}

fn realtime_range() -> (i32, i32) {
    (libc::SIGRTMIN(), libc::SIGRTMAX())
}

fn valid_signal_number(number: i32) -> bool {
    let (rtmin, rtmax) = realtime_range();
    (1..=31).contains(&number) || (number >= rtmin && number <= rtmax && number <= MAX_SIGNAL)
}

/// Parse the `RTMIN`/`RTMAX` forms. `None` means the name is not a
/// real-time form at all; `Some(Err(..))` means it is but the offset is
/// out of range or malformed.
fn parse_realtime(name: &str) -> Option<Result<i32, ()>> {
    let (base, rest, positive) = if let Some(rest) = name.strip_prefix("RTMIN") {
        (realtime_range().0, rest, true)
    } else if let Some(rest) = name.strip_prefix("RTMAX") {
        (realtime_range().1, rest, false)
    } else {
        return None;
    };

    if rest.is_empty() {
        return Some(Ok(base));
    }
    let offset = match rest.strip_prefix(if positive { '+' } else { '-' }) {
        Some(digits) => match digits.parse::<i32>() {
            Ok(offset) if offset >= 0 => offset,
            _ => return Some(Err(())),
        },
        None => return Some(Err(())),
    };
    let number = if positive {
        base.checked_add(offset)
    } else {
        base.checked_sub(offset)
    };
    match number {
        Some(number) if valid_signal_number(number) => Some(Ok(number)),
        _ => Some(Err(())),
    }
}

// Delivery flags shared with the OS handler. Process-global because
// dispositions are; the session assumes it is the only shell in the
// process.
static CAUGHT: [AtomicBool; MAX_SIGNAL as usize + 1] =
    [const { AtomicBool::new(false) }; MAX_SIGNAL as usize + 1];
static PENDING: AtomicBool = AtomicBool::new(false);

/// The installed OS handler. Async-signal-safe: stores into atomics and
/// returns.
extern "C" fn record_signal(signum: libc::c_int) {
    if signum >= 1 && signum <= MAX_SIGNAL {
        CAUGHT[signum as usize].store(true, Ordering::Relaxed);
        PENDING.store(true, Ordering::Release);
    }
}

/// Signal numbers recorded since the last drain, in ascending order.
///
/// A signal arriving mid-drain is either picked up now or leaves
/// `PENDING` set for the next poll; nothing is lost either way.
pub(crate) fn take_caught() -> Vec<i32> {
    if !PENDING.swap(false, Ordering::Acquire) {
        return Vec::new();
    }
    let mut caught = Vec::new();
    for signum in 1..=MAX_SIGNAL {
        if CAUGHT[signum as usize].swap(false, Ordering::Relaxed) {
            caught.push(signum);
        }
    }
    caught
}

/// Put a delivery flag back, for signals whose handler is already
/// running when a drain happens.
pub(crate) fn rearm(signum: i32) {
    if signum >= 1 && signum <= MAX_SIGNAL {
        CAUGHT[signum as usize].store(true, Ordering::Relaxed);
        PENDING.store(true, Ordering::Release);
    }
}

/// A disposition saved at install time, to put back when the trap is
/// cleared.
pub(crate) struct SavedAction {
    signum: i32,
    action: libc::sigaction,
}

impl SavedAction {
    pub(crate) fn signum(&self) -> i32 {
        self.signum
    }
}

/// Point `signum` at the flag-recording handler, returning the previous
/// disposition.
pub(crate) fn install(signum: i32) -> io::Result<SavedAction> {
    // SAFETY: libc::sigaction is zeroable, and the handler we install
    // only touches static atomics.
    let mut new_action: libc::sigaction = unsafe { std::mem::zeroed() };
    new_action.sa_sigaction = record_signal as libc::sighandler_t;
    new_action.sa_flags = libc::SA_RESTART;
    let mut old_action: libc::sigaction = unsafe { std::mem::zeroed() };
    // SAFETY: both structs are valid for the duration of the call.
    let rc = unsafe {
        libc::sigemptyset(&mut new_action.sa_mask);
        libc::sigaction(signum, &new_action, &mut old_action)
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(SavedAction {
        signum,
        action: old_action,
    })
}

/// Put a saved disposition back.
pub(crate) fn restore(saved: &SavedAction) -> io::Result<()> {
    // SAFETY: the saved struct came from a successful sigaction call for
    // this signal number.
    let rc = unsafe { libc::sigaction(saved.signum, &saved.action, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// The handler address currently installed for `signum`, for asserting
/// install/restore behavior.
#[cfg(test)]
pub(crate) fn installed_handler(signum: i32) -> libc::sighandler_t {
    let mut current: libc::sigaction = unsafe { std::mem::zeroed() };
    // SAFETY: passing a null new action only queries the disposition.
    unsafe { libc::sigaction(signum, std::ptr::null(), &mut current) };
    current.sa_sigaction
}

#[cfg(test)]
pub(crate) fn recording_handler() -> libc::sighandler_t {
    record_signal as libc::sighandler_t
}
