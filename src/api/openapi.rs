#[cfg(feature = "swagger")]
use utoipa::OpenApi;

#[cfg(feature = "swagger")]
use crate::api::v1::{LoadSchedulerDataError, ResetDebtRequest, ResetDebtResponse};

#[cfg(feature = "swagger")]
#[derive(OpenApi)]
#[openapi(
    paths(crate::api::v1::load_scheduler_data, crate::api::v1::load_scheduler_reset_debt, crate::api::health::health_check),
    components(schemas(LoadSchedulerDataError, ResetDebtRequest, ResetDebtResponse)),
    tags((name = "load-scheduler", description = "Residential load scheduler dashboard API"))
)]
pub struct ApiDoc;
