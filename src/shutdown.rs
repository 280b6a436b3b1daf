//! Signal handling for `sync`.
//!
//! The first SIGINT, SIGTERM or SIGHUP cancels the returned token: the engine
//! stops scheduling assets and waits for uploads already in flight. A second
//! signal abandons those uploads and exits with [`FORCE_EXIT_CODE`]. Files
//! whose upload never completed have no index record and are retried on the
//! next run.

use tokio_util::sync::CancellationToken;

/// Exit status when a second signal interrupts the drain.
pub(crate) const FORCE_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Interrupt,
    #[cfg_attr(not(unix), allow(dead_code))]
    Terminate,
    #[cfg_attr(not(unix), allow(dead_code))]
    Hangup,
}

impl Signal {
    fn name(self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Hangup => "SIGHUP",
        }
    }
}

/// Registered OS listeners.
struct Listeners {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Listeners {
    fn register() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
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

    async fn next(&mut self) -> std::io::Result<Signal> {
        #[cfg(unix)]
        {
            tokio::select! {
                result = tokio::signal::ctrl_c() => result.map(|()| Signal::Interrupt),
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

/// Register signal listeners and return the token they cancel.
///
/// Registration happens before this returns, so failures reach the caller.
pub(crate) fn install_signal_handler() -> std::io::Result<CancellationToken> {
    let mut listeners = Listeners::register()?;
    let token = CancellationToken::new();
    let handler_token = token.clone();

    tokio::spawn(async move {
        let mut received = 0u32;
        loop {
            let signal = match listeners.next().await {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!("Stopped listening for signals: {}", e);
                    return;
                }
            };
            received += 1;
            if received == 1 {
                tracing::info!(
                    signal = signal.name(),
                    "Shutdown requested, no new uploads will start"
                );
                tracing::info!("Send the signal again to abandon in-flight uploads");
                handler_token.cancel();
            } else {
                tracing::warn!(signal = signal.name(), "Abandoning in-flight uploads");
                std::process::exit(FORCE_EXIT_CODE);
            }
        }
    });

    Ok(token)
}
