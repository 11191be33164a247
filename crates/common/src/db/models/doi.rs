//! Identifier entity

use crate::stage::{Stage, StageSet};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dois")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub doi: String,

    pub import_id: Uuid,

    pub date_published: Option<Date>,

    pub is_valid: bool,

    /// Bitmask of `Stage` flags, see `StageSet`
    pub completed_stages: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub pm_id: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub pmc_id: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn stages(&self) -> StageSet {
        StageSet::from_bits(self.completed_stages)
    }

    pub fn is_completed(&self, stage: Stage) -> bool {
        self.stages().contains(stage)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::import::Entity",
        from = "Column::ImportId",
        to = "super::import::Column::Id"
    )]
    Import,

    #[sea_orm(has_many = "super::url::Entity")]
    Urls,

    #[sea_orm(has_many = "super::request::Entity")]
    Requests,
}

impl Related<super::import::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Import.def()
    }
}

impl Related<super::url::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Urls.def()
    }
}

impl Related<super::request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Requests.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
