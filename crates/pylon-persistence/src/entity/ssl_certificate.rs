//! SSL certificate entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "pylon_ssl_certificate")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub gateway_id: i64,
    pub stage_id: i64,
    pub name: String,
    /// Comma separated server names
    pub snis: String,
    #[sea_orm(column_type = "Text")]
    pub cert: String,
    #[sea_orm(column_type = "Text")]
    pub key: String,
    pub updated_time: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
