//! Counters for the device flow, session refreshes and token verification
//!
//! Metrics are recorded through the `metrics` facade. Without an installed
//! recorder every call is a cheap no-op, so library code records
//! unconditionally.
//!
//! # Metrics
//!
//! - `oidc_device_polls_total{outcome}`: token-endpoint polls by outcome
//!   (`pending`, `slow_down`, `success`, `denied`, `expired`, `error`)
//! - `oidc_device_refresh_total{outcome}`: refresh-token grants (`success`, `error`)
//! - `oidc_device_verifications_total{result}`: bearer verifications
//!   (`valid`, `invalid`, `error`)
//!
//! # Examples
//!
//! ```
//! use oidc_device::metrics::{record_poll, PollOutcome};
//!
//! record_poll(PollOutcome::Pending);
//! ```

use std::net::SocketAddr;

use metrics::increment_counter;

/// Outcome label of a single token-endpoint poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// `authorization_pending`
    Pending,
    /// `slow_down`
    SlowDown,
    /// Tokens issued
    Success,
    /// `access_denied`
    Denied,
    /// `expired_token`
    Expired,
    /// Transport, parse or other provider error
    Error,
}

impl PollOutcome {
    /// Metric label value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::SlowDown => "slow_down",
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Expired => "expired",
            Self::Error => "error",
        }
    }
}

/// Records one token-endpoint poll.
pub fn record_poll(outcome: PollOutcome) {
    increment_counter!("oidc_device_polls_total", "outcome" => outcome.as_str());
}

/// Records one refresh-token grant attempt.
pub fn record_refresh(success: bool) {
    let outcome = if success { "success" } else { "error" };
    increment_counter!("oidc_device_refresh_total", "outcome" => outcome);
}

/// Records one bearer-token verification.
///
/// `None` means the verification could not be performed (key-set fetch
/// failure).
pub fn record_verification(valid: Option<bool>) {
    let result = match valid {
        Some(true) => "valid",
        Some(false) => "invalid",
        None => "error",
    };
    increment_counter!("oidc_device_verifications_total", "result" => result);
}

/// Installs the Prometheus exporter listening on `addr`.
///
/// Only has an effect when compiled with the `prometheus` feature; otherwise
/// a configured address is logged and ignored.
pub fn init_metrics_exporter(addr: Option<SocketAddr>) {
    let Some(addr) = addr else {
        return;
    };

    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        match PrometheusBuilder::new().with_http_listener(addr).install() {
            Ok(()) => tracing::info!(%addr, "Prometheus exporter listening"),
            Err(e) => tracing::warn!("Failed to install Prometheus exporter: {}", e),
        }
    }

    #[cfg(not(feature = "prometheus"))]
    tracing::warn!(
        %addr,
        "metrics_addr is set but oidc-device was built without the prometheus feature"
    );
}
