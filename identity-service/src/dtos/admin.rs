use serde::Deserialize;
use utoipa::ToSchema;

use crate::models::AccountStatus;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeStatusRequest {
    #[schema(example = "BANNED")]
    pub status: AccountStatus,
}
