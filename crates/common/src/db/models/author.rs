//! Author entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "authors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Exact display name; unique
    #[sea_orm(column_type = "Text", unique)]
    pub name: String,

    /// ORCID suffix when the source has one
    #[sea_orm(column_type = "Text", nullable)]
    pub external_author_id: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::paper_author::Entity")]
    PaperAuthors,
}

impl Related<super::paper_author::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaperAuthors.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for crate::persistence::Author {
    fn from(m: Model) -> Self {
        Self {
            id: m.id,
            name: m.name,
            external_author_id: m.external_author_id,
        }
    }
}
