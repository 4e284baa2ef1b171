use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resident or staff account as seen by the marketplace (read-only here)
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub email: String,
    pub display_name: String,
    pub role: UserRole,
    #[sea_orm(nullable)]
    pub municipality_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub barangay_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub date_of_birth: Option<NaiveDate>,
    pub email_verified: bool,
    /// Identity documents approved by a municipal admin
    pub admin_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn is_fully_verified(&self) -> bool {
        self.email_verified && self.admin_verified
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::municipality::Entity",
        from = "Column::MunicipalityId",
        to = "super::municipality::Column::Id"
    )]
    Municipality,
}

impl Related<super::municipality::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Municipality.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UserRole {
    #[sea_orm(string_value = "resident")]
    Resident,
    #[sea_orm(string_value = "municipal_admin")]
    MunicipalAdmin,
    #[sea_orm(string_value = "provincial_admin")]
    ProvincialAdmin,
    #[sea_orm(string_value = "superadmin")]
    #[serde(rename = "superadmin")]
    #[strum(serialize = "superadmin")]
    SuperAdmin,
}
