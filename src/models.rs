//! Rows of the bibliographic model and the handles sources return.
//!
//! Every row carries a `source` column: the provenance tag of the source
//! run that created it.

use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct Journal {
    pub id: i64,
    pub title: String,
    pub issn: Option<String>,
    pub eissn: Option<String>,
    pub url: Option<String>,
    pub publisher_id: Option<i64>,
    pub is_free_to_read: Option<bool>,
    pub license: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Article {
    pub id: i64,
    pub title: Option<String>,
    pub doi: Option<String>,
    pub journal_id: Option<i64>,
    pub date_published: Option<String>,
    pub period: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ArticleList {
    pub id: i64,
    pub name: String,
    pub period: Option<String>,
    pub log: Option<String>,
    pub source: String,
}

/// Fields for a journal that does not exist yet.
#[derive(Debug, Clone, Default)]
pub struct NewJournal {
    pub title: String,
    pub issn: Option<String>,
    pub eissn: Option<String>,
    pub url: Option<String>,
    pub publisher_id: Option<i64>,
    pub is_free_to_read: Option<bool>,
    pub license: Option<String>,
}

/// Fields for an article that does not exist yet.
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub title: Option<String>,
    pub doi: Option<String>,
    pub journal_id: Option<i64>,
    pub date_published: Option<String>,
    pub period: Option<String>,
}

/// A stored list, as returned by a source's process step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListHandle {
    pub id: i64,
    pub name: String,
}

/// What a successful `process()` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutput {
    ArticleList(ListHandle),
    JournalList(ListHandle),
    /// Rows written without a list to group them.
    Records(u64),
}

impl std::fmt::Display for ProcessOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessOutput::ArticleList(list) => write!(f, "article list '{}' (#{})", list.name, list.id),
            ProcessOutput::JournalList(list) => write!(f, "journal list '{}' (#{})", list.name, list.id),
            ProcessOutput::Records(n) => write!(f, "{} records", n),
        }
    }
}
