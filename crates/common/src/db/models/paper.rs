//! Paper entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "papers")]
pub struct Model {
    /// DOI as reported by the source
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub external_id: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    pub year: Option<i32>,

    #[sea_orm(column_type = "Text")]
    pub abstract_text: String,

    pub citation_count: i64,

    #[sea_orm(column_type = "Text", nullable)]
    pub link: Option<String>,

    /// Crossref work type, e.g. `journal-article`
    #[sea_orm(column_type = "Text", nullable)]
    pub kind: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::paper_author::Entity")]
    PaperAuthors,

    #[sea_orm(has_many = "super::paper_keyword::Entity")]
    PaperKeywords,
}

impl Related<super::paper_author::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaperAuthors.def()
    }
}

impl Related<super::paper_keyword::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaperKeywords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for crate::persistence::Paper {
    fn from(m: Model) -> Self {
        Self {
            external_id: m.external_id,
            title: m.title,
            year: m.year,
            abstract_text: m.abstract_text,
            citation_count: m.citation_count,
            link: m.link,
            kind: m.kind,
        }
    }
}
