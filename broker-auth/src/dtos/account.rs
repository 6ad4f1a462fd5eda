use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AccountCredentialsRequest {
    #[validate(length(min = 1, max = 255, message = "Login is required"))]
    pub login: String,

    #[validate(length(min = 1, max = 4096, message = "Secret is required"))]
    pub secret: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SetPermissionRequest {
    pub can_trade: bool,
}
