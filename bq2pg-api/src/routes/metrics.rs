use actix_web::{Responder, get, web};
use metrics_exporter_prometheus::PrometheusHandle;

#[utoipa::path(
    summary = "Get prometheus metrics",
    description = "Returns the replication counters and table copy durations in the Prometheus text format.",
    responses(
        (status = 200, description = "Metrics returned successfully", body = String),
    ),
    tag = "Metrics"
)]
#[get("/metrics")]
pub async fn metrics(metrics_handle: web::ThinData<PrometheusHandle>) -> impl Responder {
    metrics_handle.render()
}
