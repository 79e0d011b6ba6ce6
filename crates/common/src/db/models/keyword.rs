//! Keyword entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "keywords")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text", unique)]
    pub keyword: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::paper_keyword::Entity")]
    PaperKeywords,
}

impl Related<super::paper_keyword::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaperKeywords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for crate::persistence::Keyword {
    fn from(m: Model) -> Self {
        Self {
            id: m.id,
            keyword: m.keyword,
        }
    }
}
