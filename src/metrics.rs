use tracing::trace;

// Trace-based counters; the Prometheus recorder installed in main renders /metrics.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "onboard.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, status: &'static str, elapsed_ms: u128) {
    trace!(
        target = "onboard.metrics",
        stage = stage,
        status = status,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn upstream_call(service: &'static str, status: u16) {
    trace!(
        target = "onboard.metrics",
        service = service,
        status = status,
        "upstream_call"
    );
}
