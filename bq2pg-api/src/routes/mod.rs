use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod health_check;
pub mod metrics;
pub mod replicate;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorMessage {
    #[schema(example = "Missing required parameters: PG_HOST, PG_PORT")]
    pub error: String,
}
