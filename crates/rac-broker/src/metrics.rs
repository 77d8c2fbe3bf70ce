//! Metric names recorded by the broker.

/// Client sessions started (counter).
pub const RAC_SESSIONS_TOTAL: &str = "rac_sessions_total";
/// Client sessions currently running (gauge).
pub const RAC_SESSIONS_ACTIVE: &str = "rac_sessions_active";
/// Client sessions currently paired (gauge).
pub const RAC_SESSIONS_PAIRED: &str = "rac_sessions_paired";
/// Session lifetime (histogram, labels: outcome).
pub const RAC_SESSION_DURATION_SECONDS: &str = "rac_session_duration_seconds";
/// Pair offers delivered to instance groups (counter).
pub const RAC_OFFERS_SENT_TOTAL: &str = "rac_offers_sent_total";
/// Time from connect to pairing (histogram).
pub const RAC_PAIR_DURATION_SECONDS: &str = "rac_pair_duration_seconds";
/// Sessions closed because nobody claimed them (counter, labels: cause).
pub const RAC_PAIR_FAILURES_TOTAL: &str = "rac_pair_failures_total";
/// Frames relayed (counter, labels: direction).
pub const RAC_FRAMES_RELAYED_TOTAL: &str = "rac_frames_relayed_total";
/// Frames dropped (counter, labels: direction, reason).
pub const RAC_FRAMES_DROPPED_TOTAL: &str = "rac_frames_dropped_total";
/// Session teardown broadcasts (counter).
pub const RAC_TEARDOWNS_TOTAL: &str = "rac_teardowns_total";
/// Worker control connections currently registered (gauge).
pub const RAC_WORKER_INSTANCES_ACTIVE: &str = "rac_worker_instances_active";

/// Every name above, for exporters that pre-describe metrics.
pub const ALL: [&str; 11] = [
    RAC_SESSIONS_TOTAL,
    RAC_SESSIONS_ACTIVE,
    RAC_SESSIONS_PAIRED,
    RAC_SESSION_DURATION_SECONDS,
    RAC_OFFERS_SENT_TOTAL,
    RAC_PAIR_DURATION_SECONDS,
    RAC_PAIR_FAILURES_TOTAL,
    RAC_FRAMES_RELAYED_TOTAL,
    RAC_FRAMES_DROPPED_TOTAL,
    RAC_TEARDOWNS_TOTAL,
    RAC_WORKER_INSTANCES_ACTIVE,
];
