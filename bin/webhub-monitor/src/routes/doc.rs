use utoipa::OpenApi;

use crate::routes::{health, monitoring, tasks, workers};

#[derive(OpenApi)]
#[openapi(info(
    title = "webhub-monitor",
    description = "Forum monitor and task dispatcher API",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(tasks::TasksApi::openapi());
    root.merge(workers::WorkersApi::openapi());
    root.merge(monitoring::MonitoringApi::openapi());
    root
}
