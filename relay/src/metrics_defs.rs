use shared::metrics_defs::{MetricDef, MetricType};

pub const WEBHOOKS_RECEIVED: MetricDef = MetricDef {
    name: "webhook.received",
    metric_type: MetricType::Counter,
    description: "Webhooks accepted for relay. Tagged with encoding.",
};

pub const WEBHOOKS_REJECTED: MetricDef = MetricDef {
    name: "webhook.rejected",
    metric_type: MetricType::Counter,
    description: "Webhooks whose body could not be normalized",
};

pub const DELIVERY_ATTEMPTS: MetricDef = MetricDef {
    name: "delivery.attempts",
    metric_type: MetricType::Counter,
    description: "Downstream delivery attempts. Tagged with outcome.",
};

pub const DELIVERY_DURATION: MetricDef = MetricDef {
    name: "delivery.duration",
    metric_type: MetricType::Histogram,
    description: "Downstream delivery duration in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    WEBHOOKS_RECEIVED,
    WEBHOOKS_REJECTED,
    DELIVERY_ATTEMPTS,
    DELIVERY_DURATION,
];
