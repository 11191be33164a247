//! Request log entity: one row per outbound call made for an identifier

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub doi: String,

    #[sea_orm(column_type = "Text")]
    pub request_url: String,

    /// Stage that issued the call
    #[sea_orm(column_type = "Text")]
    pub request_type: String,

    /// Raw body, or the transport error when no response arrived
    #[sea_orm(column_type = "Text", nullable)]
    pub response_content: Option<String>,

    /// None when no HTTP response arrived
    pub response_status: Option<i32>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::doi::Entity",
        from = "Column::Doi",
        to = "super::doi::Column::Doi"
    )]
    Doi,
}

impl Related<super::doi::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Doi.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
