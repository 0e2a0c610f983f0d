//! # Prometheus Metrics
//!
//! Operational metrics for the custody node, scraped at `/metrics` on the
//! metrics port. Everything lives in a dedicated [`prometheus::Registry`]
//! with the `custody` prefix.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use custody_contracts::LedgerSnapshot;

/// A state-changing ledger operation, as labelled in metrics and receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Deposit,
    Withdraw,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Deposit => "deposit",
            Operation::Withdraw => "withdraw",
        }
    }
}

/// Metric handles for the node. Cloning shares the underlying series.
#[derive(Clone)]
pub struct LedgerMetrics {
    registry: Registry,
    /// Successful deposits.
    pub deposits_total: IntCounter,
    /// Successful withdrawals.
    pub withdrawals_total: IntCounter,
    /// Rejected operations, labelled by `operation` and `reason`.
    pub rejected_operations_total: IntCounterVec,
    /// Value currently held by the ledger.
    pub total_deposited: IntGauge,
    /// Accounts that have ever held a balance.
    pub accounts: IntGauge,
    /// Time spent inside the custodian per operation, labelled by `operation`.
    pub operation_latency_seconds: HistogramVec,
}

fn register<C>(registry: &Registry, collector: C) -> Result<C, prometheus::Error>
where
    C: Collector + Clone + 'static,
{
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

impl LedgerMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("custody".into()), None)?;

        let deposits_total = register(
            &registry,
            IntCounter::new("deposits_total", "Total number of successful deposits")?,
        )?;
        let withdrawals_total = register(
            &registry,
            IntCounter::new("withdrawals_total", "Total number of successful withdrawals")?,
        )?;
        let rejected_operations_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "rejected_operations_total",
                    "Operations rejected by the custodian, by reason",
                ),
                &["operation", "reason"],
            )?,
        )?;
        let total_deposited = register(
            &registry,
            IntGauge::new("total_deposited", "Value currently held by the ledger")?,
        )?;
        let accounts = register(
            &registry,
            IntGauge::new("accounts", "Accounts that have ever held a balance")?,
        )?;
        let operation_latency_seconds = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new(
                    "operation_latency_seconds",
                    "Time spent applying a ledger operation, in seconds",
                )
                .buckets(vec![
                    0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1,
                ]),
                &["operation"],
            )?,
        )?;

        Ok(Self {
            registry,
            deposits_total,
            withdrawals_total,
            rejected_operations_total,
            total_deposited,
            accounts,
            operation_latency_seconds,
        })
    }

    pub fn record_success(&self, operation: Operation, elapsed: Duration) {
        match operation {
            Operation::Deposit => self.deposits_total.inc(),
            Operation::Withdraw => self.withdrawals_total.inc(),
        }
        self.observe_latency(operation, elapsed);
    }

    pub fn record_rejection(&self, operation: Operation, reason: &str, elapsed: Duration) {
        self.rejected_operations_total
            .with_label_values(&[operation.as_str(), reason])
            .inc();
        self.observe_latency(operation, elapsed);
    }

    /// Syncs the gauges with the ledger's current aggregates.
    pub fn observe_snapshot(&self, snapshot: &LedgerSnapshot) {
        self.total_deposited
            .set(i64::try_from(snapshot.total_deposited).unwrap_or(i64::MAX));
        self.accounts
            .set(i64::try_from(snapshot.account_count).unwrap_or(i64::MAX));
    }

    fn observe_latency(&self, operation: Operation, elapsed: Duration) {
        self.operation_latency_seconds
            .with_label_values(&[operation.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<LedgerMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_prefixed_series() {
        let metrics = LedgerMetrics::new().unwrap();
        metrics.record_success(Operation::Deposit, Duration::from_micros(20));
        metrics.record_rejection(
            Operation::Withdraw,
            "withdrawal_over_limit",
            Duration::from_micros(5),
        );

        let text = metrics.encode().unwrap();
        assert!(text.contains("custody_deposits_total 1"));
        assert!(text.contains("custody_withdrawals_total 0"));
        assert!(text.contains(
            "custody_rejected_operations_total{operation=\"withdraw\",reason=\"withdrawal_over_limit\"} 1"
        ));
        assert!(text.contains("custody_operation_latency_seconds_bucket"));
    }

    #[test]
    fn snapshot_drives_gauges() {
        let metrics = LedgerMetrics::new().unwrap();
        metrics.observe_snapshot(&LedgerSnapshot {
            withdrawal_limit: 100,
            capacity: 1_000,
            total_deposited: 750,
            deposit_count: 3,
            withdrawal_count: 1,
            account_count: 2,
        });
        assert_eq!(metrics.total_deposited.get(), 750);
        assert_eq!(metrics.accounts.get(), 2);
    }

    #[test]
    fn operation_labels_are_stable() {
        assert_eq!(Operation::Deposit.as_str(), "deposit");
        assert_eq!(
            serde_json::to_value(Operation::Withdraw).unwrap(),
            serde_json::json!("withdraw")
        );
    }
}
