//! Engine metrics.
//!
//! Counter and histogram names are stable; dashboards key on them.

use foreman_core::{AuditReport, DispatchTelemetry, Severity};

/// Records one cascade or batch dispatch pass.
pub fn record_dispatch(telemetry: &DispatchTelemetry) {
    metrics::counter!("foreman_engine_dispatched_total")
        .increment(telemetry.dispatched_count as u64);
    metrics::counter!("foreman_engine_dispatch_failed_total")
        .increment(telemetry.failed_count as u64);
    metrics::counter!("foreman_engine_lock_conflicts_total")
        .increment(telemetry.conflict_count as u64);
    metrics::histogram!("foreman_engine_dispatch_latency_ms")
        .record(telemetry.dispatch_latency_ms as f64);
}

/// Records one auditor review.
pub fn record_review(report: &AuditReport) {
    let severity = match report.severity {
        Severity::None => "none",
        Severity::Minor => "minor",
        Severity::Major => "major",
    };
    metrics::counter!("foreman_engine_reviews_total", "severity" => severity).increment(1);
}
