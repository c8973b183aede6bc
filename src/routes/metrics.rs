use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus scrape endpoint, text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the watcher emits.
pub fn describe() {
    metrics::describe_counter!("model3d_runs_started_total", "Generation runs started");
    metrics::describe_counter!(
        "model3d_runs_succeeded_total",
        "Generation runs that published a model"
    );
    metrics::describe_counter!(
        "model3d_runs_failed_total",
        "Generation runs that ended in failure, by stage"
    );
    metrics::describe_counter!("model3d_poll_attempts_total", "Job status queries sent");
    metrics::describe_histogram!(
        "model3d_run_duration_seconds",
        "Wall time of successful runs from queue to publish"
    );
}
