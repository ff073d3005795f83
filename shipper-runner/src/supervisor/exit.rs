//! Exit code derivation

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Offset added to a signal number for processes killed by that signal
const SIGNAL_EXIT_BASE: i32 = 128;

/// Maps the child's final status to the code the shipper exits with
///
/// A normal exit keeps its code. A process killed by a signal reports
/// `128 + signal`, the same value a POSIX shell would show.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    match status.signal() {
        Some(signal) => SIGNAL_EXIT_BASE + signal,
        None => 1,
    }
}
