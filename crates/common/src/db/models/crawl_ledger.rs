//! Dedup ledger row

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "crawl_ledger")]
pub struct Model {
    /// Namespaced key, e.g. `title:node2vec`
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub key: String,

    /// `pending`, `done` or `failed`
    #[sea_orm(column_type = "Text")]
    pub status: String,

    /// Token of the worker holding a pending claim
    #[sea_orm(column_type = "Text", nullable)]
    pub owner: Option<String>,

    pub claimed_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
