//! SeaORM entity models
//!
//! Database entities for the crawl store

mod author;
mod crawl_ledger;
mod keyword;
mod paper;
mod paper_author;
mod paper_keyword;

pub use paper::{
    ActiveModel as PaperActiveModel,
    Column as PaperColumn,
    Entity as PaperEntity,
    Model as PaperRow,
};

pub use author::{
    ActiveModel as AuthorActiveModel,
    Column as AuthorColumn,
    Entity as AuthorEntity,
    Model as AuthorRow,
};

pub use keyword::{
    ActiveModel as KeywordActiveModel,
    Column as KeywordColumn,
    Entity as KeywordEntity,
    Model as KeywordRow,
};

pub use paper_author::{
    ActiveModel as PaperAuthorActiveModel,
    Column as PaperAuthorColumn,
    Entity as PaperAuthorEntity,
};

pub use paper_keyword::{
    ActiveModel as PaperKeywordActiveModel,
    Column as PaperKeywordColumn,
    Entity as PaperKeywordEntity,
};

pub use crawl_ledger::{
    Column as LedgerColumn,
    Entity as LedgerEntity,
    Model as LedgerRow,
};
