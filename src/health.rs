//! Readiness and liveness indicators for store components.
//!
//! Indicators are plain objects owned by whoever composes the runtime and
//! handed to each store at construction. Nothing here is process-global.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// Current health of a component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum HealthStatus {
    /// Created but not started yet.
    Init,
    Up,
    Down { reason: String },
}

/// Snapshot returned by [`HealthIndicator::report`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    #[serde(flatten)]
    pub status: HealthStatus,
}

/// A single health signal.
///
/// An error reported before start-up is kept: starting does not clear it.
#[derive(Debug)]
pub struct HealthIndicator {
    status: RwLock<HealthStatus>,
}

impl HealthIndicator {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(HealthStatus::Init),
        }
    }

    pub fn set_started(&self) {
        let mut status = self.status.write();
        if *status == HealthStatus::Init {
            *status = HealthStatus::Up;
        }
    }

    pub fn report_error(&self, reason: impl Into<String>) {
        *self.status.write() = HealthStatus::Down {
            reason: reason.into(),
        };
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: self.status.read().clone(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        *self.status.read() == HealthStatus::Up
    }
}

impl Default for HealthIndicator {
    fn default() -> Self {
        Self::new()
    }
}

/// The readiness/liveness pair a store reports into.
#[derive(Clone, Debug, Default)]
pub struct ComponentIndicators {
    pub readiness: Arc<HealthIndicator>,
    pub liveness: Arc<HealthIndicator>,
}

impl ComponentIndicators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_started(&self) {
        self.readiness.set_started();
        self.liveness.set_started();
    }

    pub fn report_error(&self, reason: &str) {
        self.readiness.report_error(reason);
        self.liveness.report_error(reason);
    }

    /// Record the outcome of a store's initialization and pass it through.
    pub fn track<T, E: std::fmt::Display>(&self, result: Result<T, E>) -> Result<T, E> {
        if let Err(e) = &result {
            self.report_error(&e.to_string());
        }
        self.set_started();
        result
    }
}
