//! Graceful shutdown.

use super::registry::QueueRegistry;
use crate::error::{HiveError, SerializedError};
use crate::report::ErrorContext;
use std::process::ExitCode;
use tokio::signal;

/// Wait for SIGINT or SIGTERM and return the signal's name.
pub async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Close every queue and map the outcome to a process exit code.
///
/// A failed close is logged and reported with `context=worker-shutdown`.
pub async fn shutdown(registry: &QueueRegistry) -> ExitCode {
    match registry.close_all().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_fatal(registry, &e, "worker-shutdown");
            ExitCode::FAILURE
        }
    }
}

/// Block until a termination signal arrives, then shut down.
pub async fn run_until_signal(registry: &QueueRegistry) -> ExitCode {
    let signal = shutdown_signal().await;
    tracing::info!(signal, "Shutdown signal received, closing queues");
    shutdown(registry).await
}

/// Log a process-level failure and forward it to the reporter.
pub fn report_fatal(registry: &QueueRegistry, error: &HiveError, context: &str) {
    tracing::error!(error = %error, context, "Fatal queue error");
    registry.reporter().capture(
        &SerializedError::from_hive(error),
        &ErrorContext::new().tag("context", context),
    );
}
