//! Shared behaviour for sources that create or enrich journals.
//!
//! Journals are matched by ISSN across sources. A source only creates a
//! journal when `add-new-journals` is set, and only overwrites the fields
//! listed in `update-journal-fields` on journals that already exist.

use serde_json::Value;
use sqlx::SqliteConnection;

use crate::error::{EngineError, EngineResult};
use crate::models::{ListHandle, NewJournal};
use crate::settings::{PluginSettings, SettingSpec};
use crate::store;

/// Journal columns a source may overwrite on an existing row.
pub const UPDATABLE_FIELDS: [&str; 6] = [
    "title",
    "eissn",
    "url",
    "publisher_id",
    "is_free_to_read",
    "license",
];

pub fn journal_settings() -> Vec<SettingSpec> {
    vec![
        SettingSpec::new(
            "add-new-journals",
            "Whether to create a journal when none with the ISSN exists yet.",
            Value::Bool(false),
        ),
        SettingSpec::new(
            "update-journal-fields",
            "Fields to overwrite on journals that already exist.",
            Value::Array(vec![]),
        ),
        SettingSpec::new(
            "limit",
            "Process at most this many journals (for testing).",
            Value::Null,
        ),
    ]
}

/// What happened to one journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalChange {
    Created(i64),
    Updated(i64),
    Skipped,
}

impl JournalChange {
    pub fn id(&self) -> Option<i64> {
        match self {
            JournalChange::Created(id) | JournalChange::Updated(id) => Some(*id),
            JournalChange::Skipped => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JournalPolicy {
    pub add_new: bool,
    pub update_fields: Vec<String>,
    pub limit: Option<usize>,
}

impl JournalPolicy {
    pub fn from_settings(settings: &PluginSettings) -> EngineResult<Self> {
        let update_fields = settings.str_list("update-journal-fields")?;
        if let Some(bad) = update_fields
            .iter()
            .find(|f| !UPDATABLE_FIELDS.contains(&f.as_str()))
        {
            return Err(EngineError::config(format!(
                "update-journal-fields: unknown journal field '{}' (expected one of {})",
                bad,
                UPDATABLE_FIELDS.join(", ")
            )));
        }
        let limit = settings
            .u64("limit")?
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX));

        Ok(Self {
            add_new: settings.bool("add-new-journals")?.unwrap_or(false),
            update_fields,
            limit,
        })
    }

    fn updates(&self, field: &str) -> bool {
        self.update_fields.iter().any(|f| f == field)
    }

    /// Find the journal by ISSN, then create it or apply whitelisted
    /// fields, then add it to `list` when there is one.
    pub async fn create_or_modify(
        &self,
        conn: &mut SqliteConnection,
        tag: &str,
        issn: &str,
        fields: &NewJournal,
        list: Option<&ListHandle>,
    ) -> sqlx::Result<JournalChange> {
        let change = match store::journal_by_issn(conn, issn).await? {
            Some(mut journal) => {
                if self.updates("title") && !fields.title.is_empty() {
                    journal.title = fields.title.clone();
                }
                if self.updates("eissn") && fields.eissn.is_some() {
                    journal.eissn = fields.eissn.clone();
                }
                if self.updates("url") && fields.url.is_some() {
                    journal.url = fields.url.clone();
                }
                if self.updates("publisher_id") && fields.publisher_id.is_some() {
                    journal.publisher_id = fields.publisher_id;
                }
                if self.updates("is_free_to_read") && fields.is_free_to_read.is_some() {
                    journal.is_free_to_read = fields.is_free_to_read;
                }
                if self.updates("license") && fields.license.is_some() {
                    journal.license = fields.license.clone();
                }
                store::update_journal(conn, &journal).await?;
                tracing::debug!(issn, id = journal.id, "updated journal");
                JournalChange::Updated(journal.id)
            }
            None if self.add_new => {
                let new = NewJournal {
                    issn: Some(issn.to_string()),
                    ..fields.clone()
                };
                let id = store::create_journal(conn, &new, tag).await?;
                tracing::debug!(issn, id, "created journal");
                JournalChange::Created(id)
            }
            None => JournalChange::Skipped,
        };

        if let (Some(list), Some(id)) = (list, change.id()) {
            store::add_journal_to_list(conn, list.id, id, tag).await?;
        }
        Ok(change)
    }
}
