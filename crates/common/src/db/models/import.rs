//! Import entity: immutable audit record of one ingestion call

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "imports")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// `<INIT path>` for file imports, `<API timestamp>` for API imports
    #[sea_orm(column_type = "Text")]
    pub source: String,

    /// Normalized rows exactly as ingested
    #[sea_orm(column_type = "JsonBinary")]
    pub raw: Json,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::doi::Entity")]
    Dois,
}

impl Related<super::doi::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Dois.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
