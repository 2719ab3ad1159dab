//! Provenance-aware access to the bibliographic tables.
//!
//! The `source` column is the join key between "this source's cached data
//! has been applied" and "stored data exists": a source with no tagged rows
//! has not completed its process step, whatever its cache says.
//!
//! Lookups return `Option`; creating a missing row is always a separate,
//! explicit call.

use chrono::Utc;
use sqlx::{Row, SqliteConnection};

use crate::models::{Article, ArticleList, Journal, ListHandle, NewArticle, NewJournal};

/// Tables with a `source` column, in an order that is safe to delete from.
pub const PROVENANCE_TABLES: [&str; 7] = [
    "article_list_memberships",
    "journal_list_memberships",
    "articles",
    "article_lists",
    "journals",
    "journal_lists",
    "publishers",
];

/// Does any table hold rows tagged with `source`?
pub async fn exists_from_source(conn: &mut SqliteConnection, source: &str) -> sqlx::Result<bool> {
    for table in PROVENANCE_TABLES {
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {table} WHERE source = ?)"
        ))
        .bind(source)
        .fetch_one(&mut *conn)
        .await?;
        if exists {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Delete every row tagged with `source`. Returns the number of rows removed.
///
/// Callers that need atomicity pass a transaction's connection.
pub async fn delete_all_from_source(
    conn: &mut SqliteConnection,
    source: &str,
) -> sqlx::Result<u64> {
    let mut removed = 0;
    for table in PROVENANCE_TABLES {
        removed += sqlx::query(&format!("DELETE FROM {table} WHERE source = ?"))
            .bind(source)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(removed)
}

/// Are there rows for `period` tagged with `source`?
pub async fn exists_period_from_source(
    conn: &mut SqliteConnection,
    source: &str,
    period: &str,
) -> sqlx::Result<bool> {
    sqlx::query_scalar(
        r#"
        SELECT EXISTS(SELECT 1 FROM article_lists WHERE source = ? AND period = ?)
            OR EXISTS(SELECT 1 FROM articles WHERE source = ? AND period = ?)
        "#,
    )
    .bind(source)
    .bind(period)
    .bind(source)
    .bind(period)
    .fetch_one(&mut *conn)
    .await
}

/// Delete the rows one period of a periodic source produced.
pub async fn delete_period_from_source(
    conn: &mut SqliteConnection,
    source: &str,
    period: &str,
) -> sqlx::Result<u64> {
    let mut removed = sqlx::query(
        r#"
        DELETE FROM article_list_memberships
        WHERE source = ?
          AND (article_list_id IN (SELECT id FROM article_lists WHERE source = ? AND period = ?)
               OR article_id IN (SELECT id FROM articles WHERE source = ? AND period = ?))
        "#,
    )
    .bind(source)
    .bind(source)
    .bind(period)
    .bind(source)
    .bind(period)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    for table in ["articles", "article_lists"] {
        removed += sqlx::query(&format!(
            "DELETE FROM {table} WHERE source = ? AND period = ?"
        ))
        .bind(source)
        .bind(period)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    }
    Ok(removed)
}

/// Row counts per table for one source tag.
pub async fn counts_for_source(
    conn: &mut SqliteConnection,
    source: &str,
) -> sqlx::Result<Vec<(&'static str, i64)>> {
    let mut counts = Vec::with_capacity(PROVENANCE_TABLES.len());
    for table in PROVENANCE_TABLES {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE source = ?"))
            .bind(source)
            .fetch_one(&mut *conn)
            .await?;
        counts.push((table, n));
    }
    Ok(counts)
}

/// Every distinct provenance tag present in the database, sorted.
pub async fn distinct_sources(conn: &mut SqliteConnection) -> sqlx::Result<Vec<String>> {
    let union = PROVENANCE_TABLES
        .iter()
        .map(|t| format!("SELECT source FROM {t}"))
        .collect::<Vec<_>>()
        .join(" UNION ");
    let rows = sqlx::query(&format!("SELECT DISTINCT source FROM ({union}) ORDER BY source"))
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.iter().map(|r| r.get::<String, _>("source")).collect())
}

pub async fn create_publisher(
    conn: &mut SqliteConnection,
    name: &str,
    source: &str,
) -> sqlx::Result<i64> {
    let id = sqlx::query("INSERT INTO publishers (name, source, created_at) VALUES (?, ?, ?)")
        .bind(name)
        .bind(source)
        .bind(Utc::now().timestamp())
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
    Ok(id)
}

pub async fn journal_by_issn(
    conn: &mut SqliteConnection,
    issn: &str,
) -> sqlx::Result<Option<Journal>> {
    sqlx::query_as::<_, Journal>(
        r#"
        SELECT id, title, issn, eissn, url, publisher_id, is_free_to_read, license, source
        FROM journals WHERE issn = ? OR eissn = ?
        ORDER BY id LIMIT 1
        "#,
    )
    .bind(issn)
    .bind(issn)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn create_journal(
    conn: &mut SqliteConnection,
    journal: &NewJournal,
    source: &str,
) -> sqlx::Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO journals (title, issn, eissn, url, publisher_id, is_free_to_read, license, source, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&journal.title)
    .bind(&journal.issn)
    .bind(&journal.eissn)
    .bind(&journal.url)
    .bind(journal.publisher_id)
    .bind(journal.is_free_to_read)
    .bind(&journal.license)
    .bind(source)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Overwrite the mutable columns of an existing journal. `source` is kept:
/// the row still belongs to the source that created it.
pub async fn update_journal(conn: &mut SqliteConnection, journal: &Journal) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE journals
        SET title = ?, eissn = ?, url = ?, publisher_id = ?, is_free_to_read = ?, license = ?
        WHERE id = ?
        "#,
    )
    .bind(&journal.title)
    .bind(&journal.eissn)
    .bind(&journal.url)
    .bind(journal.publisher_id)
    .bind(journal.is_free_to_read)
    .bind(&journal.license)
    .bind(journal.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn article_by_doi(
    conn: &mut SqliteConnection,
    doi: &str,
) -> sqlx::Result<Option<Article>> {
    sqlx::query_as::<_, Article>(
        r#"
        SELECT id, title, doi, journal_id, date_published, period, source
        FROM articles WHERE doi = ?
        ORDER BY id LIMIT 1
        "#,
    )
    .bind(doi)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn create_article(
    conn: &mut SqliteConnection,
    article: &NewArticle,
    source: &str,
) -> sqlx::Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO articles (title, doi, journal_id, date_published, period, source, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&article.title)
    .bind(&article.doi)
    .bind(article.journal_id)
    .bind(&article.date_published)
    .bind(&article.period)
    .bind(source)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn article_list_by_name(
    conn: &mut SqliteConnection,
    name: &str,
    source: &str,
) -> sqlx::Result<Option<ArticleList>> {
    sqlx::query_as::<_, ArticleList>(
        "SELECT id, name, period, log, source FROM article_lists WHERE name = ? AND source = ?",
    )
    .bind(name)
    .bind(source)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn create_article_list(
    conn: &mut SqliteConnection,
    name: &str,
    period: Option<&str>,
    source: &str,
) -> sqlx::Result<ListHandle> {
    let id = sqlx::query(
        "INSERT INTO article_lists (name, period, source, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(name)
    .bind(period)
    .bind(source)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(ListHandle {
        id,
        name: name.to_string(),
    })
}

pub async fn add_article_to_list(
    conn: &mut SqliteConnection,
    list_id: i64,
    article_id: i64,
    source: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO article_list_memberships (article_list_id, article_id, source)
        VALUES (?, ?, ?)
        ON CONFLICT(article_list_id, article_id) DO NOTHING
        "#,
    )
    .bind(list_id)
    .bind(article_id)
    .bind(source)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn create_journal_list(
    conn: &mut SqliteConnection,
    name: &str,
    source: &str,
) -> sqlx::Result<ListHandle> {
    let id = sqlx::query("INSERT INTO journal_lists (name, source, created_at) VALUES (?, ?, ?)")
        .bind(name)
        .bind(source)
        .bind(Utc::now().timestamp())
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
    Ok(ListHandle {
        id,
        name: name.to_string(),
    })
}

pub async fn add_journal_to_list(
    conn: &mut SqliteConnection,
    list_id: i64,
    journal_id: i64,
    source: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO journal_list_memberships (journal_list_id, journal_id, source)
        VALUES (?, ?, ?)
        ON CONFLICT(journal_list_id, journal_id) DO NOTHING
        "#,
    )
    .bind(list_id)
    .bind(journal_id)
    .bind(source)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Summary row for every list, with its member count.
#[derive(Debug, Clone)]
pub struct ListSummary {
    pub kind: &'static str,
    pub name: String,
    pub source: String,
    pub members: i64,
}

pub async fn list_summaries(conn: &mut SqliteConnection) -> sqlx::Result<Vec<ListSummary>> {
    let mut summaries = Vec::new();

    let rows = sqlx::query(
        r#"
        SELECT l.name, l.source, COUNT(m.id) AS members
        FROM article_lists l
        LEFT JOIN article_list_memberships m ON m.article_list_id = l.id
        GROUP BY l.id
        ORDER BY l.source, l.name
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;
    for row in &rows {
        summaries.push(ListSummary {
            kind: "article",
            name: row.get("name"),
            source: row.get("source"),
            members: row.get("members"),
        });
    }

    let rows = sqlx::query(
        r#"
        SELECT l.name, l.source, COUNT(m.id) AS members
        FROM journal_lists l
        LEFT JOIN journal_list_memberships m ON m.journal_list_id = l.id
        GROUP BY l.id
        ORDER BY l.source, l.name
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;
    for row in &rows {
        summaries.push(ListSummary {
            kind: "journal",
            name: row.get("name"),
            source: row.get("source"),
            members: row.get("members"),
        });
    }

    Ok(summaries)
}
