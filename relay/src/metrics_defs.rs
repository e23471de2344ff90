use shared::metrics_defs::{MetricDef, MetricType};

pub const INCOMING_BYTES: MetricDef = MetricDef {
    name: "incoming.bytes",
    metric_type: MetricType::Counter,
    description: "Bytes of accepted lines. Tagged with transport.",
};

pub const INCOMING_LINES: MetricDef = MetricDef {
    name: "incoming.lines",
    metric_type: MetricType::Counter,
    description: "Number of accepted lines. Tagged with transport.",
};

pub const INCOMING_REJECTED: MetricDef = MetricDef {
    name: "incoming.rejected",
    metric_type: MetricType::Counter,
    description: "Number of lines dropped as malformed or too long. Tagged with transport.",
};

pub const OUTGOING_BYTES: MetricDef = MetricDef {
    name: "outgoing.bytes",
    metric_type: MetricType::Counter,
    description: "Bytes written to a backend. Tagged with backend.",
};

pub const OUTGOING_WRITE_ERRORS: MetricDef = MetricDef {
    name: "outgoing.write_errors",
    metric_type: MetricType::Counter,
    description: "Number of failed backend writes. Tagged with backend.",
};

pub const UPSTREAM_SWITCHES: MetricDef = MetricDef {
    name: "upstream.switches",
    metric_type: MetricType::Counter,
    description: "Number of times the active backend changed",
};

pub const CACHE_MAX_SIZE: MetricDef = MetricDef {
    name: "cache.max_size",
    metric_type: MetricType::Gauge,
    description: "Capacity of the message queue",
};

pub const CACHE_USED: MetricDef = MetricDef {
    name: "cache.used",
    metric_type: MetricType::Gauge,
    description: "Number of messages waiting in the queue",
};

pub const UPSTREAM_CONNECTED: MetricDef = MetricDef {
    name: "upstream.connected",
    metric_type: MetricType::Gauge,
    description: "1 if the backend holds a connection, 0 otherwise. Tagged with backend.",
};

pub const UPSTREAM_ACTIVE_RANK: MetricDef = MetricDef {
    name: "upstream.active_rank",
    metric_type: MetricType::Gauge,
    description: "Priority rank of the active backend, -1 when none is active",
};

/// Every metric the relay emits, described once at startup.
pub const ALL_METRICS: &[MetricDef] = &[
    INCOMING_BYTES,
    INCOMING_LINES,
    INCOMING_REJECTED,
    OUTGOING_BYTES,
    OUTGOING_WRITE_ERRORS,
    UPSTREAM_SWITCHES,
    CACHE_MAX_SIZE,
    CACHE_USED,
    UPSTREAM_CONNECTED,
    UPSTREAM_ACTIVE_RANK,
];
