use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Platform;

/// A customer as known to one platform.
///
/// `identity_key` is `uid:<platform_user_id>` for customers with a stable platform id and
/// `phone:<normalized phone>` otherwise; `(platform, identity_key)` is unique.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "customers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub platform: Platform,
    pub platform_user_id: Option<String>,
    pub identity_key: String,
    pub name: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Identity key for a customer with a stable platform id
pub fn stable_identity_key(platform_user_id: &str) -> String {
    format!("uid:{platform_user_id}")
}

/// Identity key for a customer known only by phone
pub fn phone_identity_key(phone: &str) -> String {
    format!("phone:{phone}")
}
