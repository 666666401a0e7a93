use utoipa::OpenApi;
use crate::{handlers, models};

#[derive(OpenApi)]
#[openapi(
    paths(handlers::publish_control),
    components(
        schemas(models::ControlRequest, models::DeviceStatus, models::StatusReport)
    )
)]
pub struct ApiDoc;
