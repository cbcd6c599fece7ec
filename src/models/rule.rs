use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::rules::RuleSpec;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RuleRegisterRequest {
    #[schema(example = "parcel")]
    pub entity_type: String,
    #[schema(example = "can_ship")]
    pub codename: String,
    #[serde(default)]
    #[schema(example = "can_ship")]
    pub field_name: Option<String>,
    #[serde(default)]
    #[schema(example = "parcel_id")]
    pub view_param_pk: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RuleRegisterRequest {
    pub fn to_spec(&self) -> RuleSpec {
        RuleSpec {
            codename: self.codename.clone(),
            field_name: self.field_name.clone(),
            view_param_pk: self.view_param_pk.clone(),
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCheckRequest {
    #[schema(example = "parcel")]
    pub entity_type: String,
    #[schema(example = "can_ship")]
    pub codename: String,
    /// Primary key of the target; a target that does not exist is never granted.
    #[schema(example = "3f1c9a52-8d4e-4b7a-9a40-1f2e3d4c5b6a")]
    pub pk: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PermissionCheckResponse {
    pub allowed: bool,
}
