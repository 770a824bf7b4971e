use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge};

const METER: &str = "network_sync";

#[derive(Clone, Default)]
pub struct Metrics {
    pub flights: FlightMetrics,
    pub controllers: ControllerMetrics,
    pub roster: RosterMetrics,
    pub passes: PassMetrics,
}

#[derive(Clone)]
pub struct FlightMetrics {
    pub saved: Counter<u64>,
    pub deleted: Counter<u64>,
    pub active: Gauge<u64>,
}

#[derive(Clone)]
pub struct ControllerMetrics {
    pub opened: Counter<u64>,
    pub retired: Counter<u64>,
    pub active: Gauge<u64>,
}

#[derive(Clone)]
pub struct RosterMetrics {
    pub saved: Counter<u64>,
    pub soft_removed: Counter<u64>,
}

#[derive(Clone)]
pub struct PassMetrics {
    pub failed: Counter<u64>,
}

impl Default for FlightMetrics {
    fn default() -> Self {
        let meter = global::meter(METER);
        let saved = meter.u64_counter("flights.saved").build();
        let deleted = meter.u64_counter("flights.deleted").build();
        let active = meter.u64_gauge("flights.active").build();

        Self {
            saved,
            deleted,
            active,
        }
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        let meter = global::meter(METER);
        let opened = meter.u64_counter("controllers.sessions.opened").build();
        let retired = meter.u64_counter("controllers.sessions.retired").build();
        let active = meter.u64_gauge("controllers.sessions.active").build();

        Self {
            opened,
            retired,
            active,
        }
    }
}

impl Default for RosterMetrics {
    fn default() -> Self {
        let meter = global::meter(METER);
        let saved = meter.u64_counter("roster.users.saved").build();
        let soft_removed = meter.u64_counter("roster.users.soft_removed").build();

        Self {
            saved,
            soft_removed,
        }
    }
}

impl Default for PassMetrics {
    fn default() -> Self {
        let meter = global::meter(METER);
        let failed = meter.u64_counter("passes.failed").build();

        Self { failed }
    }
}
