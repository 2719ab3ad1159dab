use anyhow::Result;
use sqlx::SqlitePool;

use crate::store::PROVENANCE_TABLES;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS publishers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            source TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS journals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            issn TEXT,
            eissn TEXT,
            url TEXT,
            publisher_id INTEGER,
            is_free_to_read INTEGER,
            license TEXT,
            source TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (publisher_id) REFERENCES publishers(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT,
            doi TEXT,
            journal_id INTEGER,
            date_published TEXT,
            period TEXT,
            source TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (journal_id) REFERENCES journals(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS article_lists (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            period TEXT,
            log TEXT,
            source TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS article_list_memberships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            article_list_id INTEGER NOT NULL,
            article_id INTEGER NOT NULL,
            source TEXT NOT NULL,
            UNIQUE(article_list_id, article_id),
            FOREIGN KEY (article_list_id) REFERENCES article_lists(id),
            FOREIGN KEY (article_id) REFERENCES articles(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS journal_lists (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            source TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS journal_list_memberships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            journal_list_id INTEGER NOT NULL,
            journal_id INTEGER NOT NULL,
            source TEXT NOT NULL,
            UNIQUE(journal_list_id, journal_id),
            FOREIGN KEY (journal_list_id) REFERENCES journal_lists(id),
            FOREIGN KEY (journal_id) REFERENCES journals(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Every provenance lookup filters on `source`
    for table in PROVENANCE_TABLES {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_source ON {table}(source)"
        ))
        .execute(pool)
        .await?;
    }
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_doi ON articles(doi)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_journals_issn ON journals(issn)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_article_lists_period ON article_lists(source, period)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
