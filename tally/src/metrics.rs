//! Credit ledger metrics for Prometheus.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, register_int_counter, register_int_counter_vec};

/// Counter for successful credit deductions
static CREDITS_DEDUCTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tally_credits_deducted_total",
        "Total credits deducted, by action",
        &["action"]
    )
    .expect("Failed to register tally_credits_deducted_total metric")
});

/// Counter for deductions refused because the balance could not afford them
static DEDUCTIONS_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tally_deductions_rejected_total",
        "Deductions refused for insufficient credits"
    )
    .expect("Failed to register tally_deductions_rejected_total metric")
});

/// Counter for balances raised to a higher plan allowance during reads
static RECONCILIATION_TOPUPS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tally_reconciliation_topups_total",
        "Stored balances raised to the plan's current allowance"
    )
    .expect("Failed to register tally_reconciliation_topups_total metric")
});

/// Record a successful credit deduction
pub fn record_deduction(action: &str, cost: i64) {
    CREDITS_DEDUCTED
        .with_label_values(&[action])
        .inc_by(cost.max(0) as u64);
}

/// Record a deduction refused for insufficient credits
pub fn record_deduction_rejected() {
    DEDUCTIONS_REJECTED.inc();
}

/// Record an upward reconciliation of a stored balance
pub fn record_reconciliation_top_up() {
    RECONCILIATION_TOPUPS.inc();
}
