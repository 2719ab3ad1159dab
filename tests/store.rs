//! Provenance store tests against a real SQLite file.

use oacensus::db;
use oacensus::migrate;
use oacensus::models::{NewArticle, NewJournal};
use oacensus::store;
use sqlx::SqlitePool;
use tempfile::TempDir;

async fn setup() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("store.sqlite3")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (tmp, pool)
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let (_tmp, pool) = setup().await;
    migrate::run_migrations(&pool).await.unwrap();
}

#[tokio::test]
async fn test_find_or_create_journal_by_issn() {
    let (_tmp, pool) = setup().await;
    let mut conn = pool.acquire().await.unwrap();

    assert!(store::journal_by_issn(&mut conn, "1932-6203").await.unwrap().is_none());

    let publisher = store::create_publisher(&mut conn, "PLOS", "doaj").await.unwrap();
    let journal = NewJournal {
        title: "PLOS ONE".to_string(),
        issn: Some("1932-6203".to_string()),
        publisher_id: Some(publisher),
        is_free_to_read: Some(true),
        license: Some("cc-by".to_string()),
        ..Default::default()
    };
    let id = store::create_journal(&mut conn, &journal, "doaj").await.unwrap();

    let found = store::journal_by_issn(&mut conn, "1932-6203").await.unwrap().unwrap();
    assert_eq!(found.id, id);
    assert_eq!(found.is_free_to_read, Some(true));
    assert_eq!(found.source, "doaj");

    let list = store::create_journal_list(&mut conn, "DOAJ journals", "doaj").await.unwrap();
    store::add_journal_to_list(&mut conn, list.id, id, "doaj").await.unwrap();
    // Membership is a set.
    store::add_journal_to_list(&mut conn, list.id, id, "doaj").await.unwrap();

    let summaries = store::list_summaries(&mut conn).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].kind, "journal");
    assert_eq!(summaries[0].members, 1);
}

#[tokio::test]
async fn test_delete_all_from_source_leaves_other_sources() {
    let (_tmp, pool) = setup().await;
    let mut conn = pool.acquire().await.unwrap();

    let article = NewArticle {
        doi: Some("10.1/shared".to_string()),
        ..Default::default()
    };
    let shared = store::create_article(&mut conn, &article, "crossref").await.unwrap();
    let list = store::create_article_list(&mut conn, "funded", None, "wellcome").await.unwrap();
    store::add_article_to_list(&mut conn, list.id, shared, "wellcome").await.unwrap();

    assert_eq!(
        store::distinct_sources(&mut conn).await.unwrap(),
        vec!["crossref".to_string(), "wellcome".to_string()]
    );

    let removed = store::delete_all_from_source(&mut conn, "wellcome").await.unwrap();
    assert_eq!(removed, 2);
    assert!(!store::exists_from_source(&mut conn, "wellcome").await.unwrap());
    assert!(store::article_by_doi(&mut conn, "10.1/shared").await.unwrap().is_some());
    assert!(store::article_list_by_name(&mut conn, "funded", "wellcome")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_delete_period_only_touches_that_period() {
    let (_tmp, pool) = setup().await;
    let mut conn = pool.acquire().await.unwrap();

    for period in ["2010-01", "2010-02"] {
        let list = store::create_article_list(&mut conn, period, Some(period), "pubmed")
            .await
            .unwrap();
        let article = NewArticle {
            doi: Some(format!("10.1/{}", period)),
            period: Some(period.to_string()),
            ..Default::default()
        };
        let id = store::create_article(&mut conn, &article, "pubmed").await.unwrap();
        store::add_article_to_list(&mut conn, list.id, id, "pubmed").await.unwrap();
    }

    let removed = store::delete_period_from_source(&mut conn, "pubmed", "2010-01").await.unwrap();
    assert_eq!(removed, 3);
    assert!(!store::exists_period_from_source(&mut conn, "pubmed", "2010-01").await.unwrap());
    assert!(store::exists_period_from_source(&mut conn, "pubmed", "2010-02").await.unwrap());

    let counts = store::counts_for_source(&mut conn, "pubmed").await.unwrap();
    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    assert_eq!(total, 3);
}
