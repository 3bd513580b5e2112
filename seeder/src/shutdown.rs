//! Turns process signals into the cancellation token the scheduler runs under.
//!
//! The first SIGINT, SIGTERM or SIGHUP cancels the token: the timers stop, an in-flight
//! refresh finishes and the active job is stopped so its content stays intact. A second
//! signal exits immediately.

use std::io;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit status of a forced exit, as a shell reports death by SIGINT.
pub const FORCED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Hangup,
}

impl Signal {
    pub fn name(self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Hangup => "SIGHUP",
        }
    }
}

/// Registered signal streams, created once and polled for every signal.
struct Listener {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Listener {
    fn new() -> io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    async fn next(&mut self) -> io::Result<Signal> {
        #[cfg(unix)]
        {
            tokio::select! {
                res = tokio::signal::ctrl_c() => res.map(|()| Signal::Interrupt),
                _ = self.terminate.recv() => Ok(Signal::Terminate),
                _ = self.hangup.recv() => Ok(Signal::Hangup),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.map(|()| Signal::Interrupt)
        }
    }
}

/// Returns a token cancelled by the first shutdown signal. Must be called inside the
/// runtime.
pub fn install_signal_handler() -> io::Result<CancellationToken> {
    let mut listener = Listener::new()?;
    let token = CancellationToken::new();

    let handler_token = token.clone();
    tokio::spawn(async move {
        let mut received = 0u32;
        loop {
            let signal = match listener.next().await {
                Ok(signal) => signal,
                Err(e) => {
                    warn!(error = %e, "stopped listening for shutdown signals");
                    return;
                }
            };
            received += 1;
            if received == 1 {
                info!(
                    signal = signal.name(),
                    "shutting down after the current refresh; signal again to force exit"
                );
                handler_token.cancel();
            } else {
                warn!(signal = signal.name(), "forced exit");
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    });

    Ok(token)
}
