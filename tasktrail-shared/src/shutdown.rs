//! Process shutdown signals
//!
//! Both binaries stop on SIGINT (ctrl-c) or SIGTERM. Handlers are installed
//! by [`ShutdownSignal::install`], before the returned value is awaited, so a
//! signal arriving during startup is not lost.

use std::fmt;

/// Which signal asked the process to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "SIGINT"),
            Signal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

pub struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    /// Registers the handlers; must be called inside a Tokio runtime
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    /// Resolves on the first shutdown signal
    pub async fn recv(mut self) -> Signal {
        #[cfg(unix)]
        let terminate = self.terminate.recv();

        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::pin!(terminate);

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for ctrl-c, waiting for SIGTERM only");
                    let _ = (&mut terminate).await;
                    return Signal::Terminate;
                }
                Signal::Interrupt
            }
            _ = &mut terminate => Signal::Terminate,
        }
    }
}
