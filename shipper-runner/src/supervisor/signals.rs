//! Signal relay
//!
//! Forwards every catchable signal sent to the shipper on to the child, so
//! that a signal meant for the workload reaches the program actually doing
//! the work instead of killing the shipper.
//!
//! The relay has an explicit lifecycle: handlers are installed before the
//! child starts, forwarding starts once its pid is known, and `stop()` ends
//! forwarding as soon as the child's final status is in.

use anyhow::{Context, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::signal::unix::{self, SignalKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Signals never forwarded to the child
///
/// SIGKILL and SIGSTOP cannot be caught. SIGILL, SIGFPE, SIGSEGV, SIGBUS and
/// SIGTRAP report faults of the shipper itself. SIGCHLD and SIGPIPE concern
/// the shipper's own children and pipes.
const NOT_RELAYED: [Signal; 9] = [
    Signal::SIGKILL,
    Signal::SIGSTOP,
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGTRAP,
    Signal::SIGCHLD,
    Signal::SIGPIPE,
];

/// Every signal forwarded to the child
fn relayed_signals() -> impl Iterator<Item = Signal> {
    Signal::iterator().filter(|signal| !NOT_RELAYED.contains(signal))
}

/// Signal handlers installed but not yet forwarding
pub struct SignalRelay {
    listeners: Vec<(Signal, unix::Signal)>,
}

impl SignalRelay {
    /// Installs handlers for every relayed signal
    ///
    /// Signals arriving between now and `start()` are kept and forwarded once
    /// the child is running.
    pub fn install() -> Result<Self> {
        let listeners = relayed_signals()
            .map(|signal| {
                unix::signal(SignalKind::from_raw(signal as i32))
                    .map(|listener| (signal, listener))
                    .with_context(|| format!("Failed to install handler for {}", signal))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { listeners })
    }

    /// Starts forwarding to the process `pid`
    pub fn start(self, pid: u32) -> RunningRelay {
        let stop = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let pid = Pid::from_raw(pid as i32);

        for (signal, listener) in self.listeners {
            tasks.spawn(relay(signal, listener, pid, stop.clone()));
        }

        debug!("Relaying {} signal(s) to process {}", tasks.len(), pid);
        RunningRelay { tasks, stop }
    }
}

/// A relay forwarding signals to a live child
pub struct RunningRelay {
    tasks: JoinSet<()>,
    stop: CancellationToken,
}

impl RunningRelay {
    /// Stops forwarding and waits for every forwarder to finish
    pub async fn stop(mut self) {
        self.stop.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!("Signal forwarder panicked: {}", e);
            }
        }
        debug!("Signal relay stopped");
    }
}

async fn relay(signal: Signal, mut listener: unix::Signal, pid: Pid, stop: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            received = listener.recv() => {
                if received.is_none() {
                    break;
                }
                forward(signal, pid);
            }
        }
    }
}

fn forward(signal: Signal, pid: Pid) {
    debug!("Relaying {} to process {}", signal, pid);
    if let Err(e) = kill(pid, signal) {
        warn!("Error relaying {} to process {}: {}", signal, pid, e);
    }
}
