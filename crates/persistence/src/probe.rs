//! Backend liveness probing.
//!
//! A probe opens a fresh, short-lived connection through the adapter, runs a
//! trivial round trip and closes the connection again. It never touches pool
//! state and never retries; retry policy belongs to the caller.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::backends::AdapterFactory;
use crate::core::{BackendAdapter, BackendDescriptor, BackendKind, DialectKind};
use crate::error::{BackendError, ConfigError};

/// Result of probing one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// Connected and answered the round trip.
    Healthy,
    /// Connection or round trip failed.
    Unreachable {
        /// Driver error text.
        reason: String,
    },
    /// No answer before the timeout.
    TimedOut {
        /// The timeout that expired.
        timeout_ms: u64,
    },
}

impl ProbeOutcome {
    /// Returns true for [`ProbeOutcome::Healthy`].
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Healthy => write!(f, "healthy"),
            ProbeOutcome::Unreachable { reason } => write!(f, "unreachable: {}", reason),
            ProbeOutcome::TimedOut { timeout_ms } => write!(f, "timed out after {}ms", timeout_ms),
        }
    }
}

/// Probe result for one descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Descriptor name and redacted connection target.
    pub descriptor: String,
    /// Role of the descriptor.
    pub kind: BackendKind,
    /// Dialect of the descriptor.
    pub dialect: DialectKind,
    /// What happened.
    pub outcome: ProbeOutcome,
    /// Wall time spent probing.
    pub elapsed_ms: u64,
}

/// Probes one backend, bounded by `timeout`.
///
/// On expiry the in-flight connection attempt is dropped, which closes any
/// transient connection.
pub async fn probe(adapter: &dyn BackendAdapter, timeout: Duration) -> ProbeOutcome {
    let check = async {
        let mut conn = adapter.connect().await?;
        conn.ping().await?;
        Ok::<(), BackendError>(())
    };

    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(())) => ProbeOutcome::Healthy,
        Ok(Err(e)) => ProbeOutcome::Unreachable {
            reason: e.to_string(),
        },
        Err(_) => ProbeOutcome::TimedOut {
            timeout_ms: timeout.as_millis() as u64,
        },
    }
}

/// Probes one descriptor and records timing.
pub async fn probe_descriptor(
    descriptor: &BackendDescriptor,
    adapter: &dyn BackendAdapter,
    timeout: Duration,
) -> ProbeReport {
    let started = Instant::now();
    let outcome = probe(adapter, timeout).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match &outcome {
        ProbeOutcome::Healthy => {
            tracing::info!(backend = %descriptor, elapsed_ms, "Backend probe healthy");
        }
        other => {
            tracing::warn!(backend = %descriptor, elapsed_ms, outcome = %other, "Backend probe failed");
        }
    }

    ProbeReport {
        descriptor: descriptor.to_string(),
        kind: descriptor.kind,
        dialect: descriptor.dialect,
        outcome,
        elapsed_ms,
    }
}

/// Probes every descriptor in order without short-circuiting.
pub async fn probe_all(
    descriptors: &[BackendDescriptor],
    factory: &dyn AdapterFactory,
    timeout: Duration,
) -> Result<Vec<ProbeReport>, ConfigError> {
    let mut reports = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let adapter = factory.adapter(descriptor)?;
        reports.push(probe_descriptor(descriptor, adapter.as_ref(), timeout).await);
    }
    Ok(reports)
}
