use audiobook_station::catalog::Catalog;
use audiobook_station::enrichment::{EnrichmentError, EnrichmentOutcome, OutcomeStore};
use audiobook_station::library::LibraryScanner;
use std::collections::BTreeSet;
use std::path::Path;
use tempfile::TempDir;

async fn touch(path: &Path) {
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(path, b"audio").await.unwrap();
}

/// Catalog with two scanned books: "Dune" and "Emma"
async fn scanned_catalog() -> (TempDir, Catalog) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("library");
    touch(&root.join("Frank Herbert/Dune (Unabridged)/part1.mp3")).await;
    touch(&root.join("Frank Herbert/Dune (Unabridged)/part2.mp3")).await;
    touch(&root.join("Austen, Jane/Emma/emma.m4b")).await;

    let catalog = Catalog::new(dir.path().join("db/catalog.db")).await.unwrap();
    let scanner = LibraryScanner::new(vec![root], vec![".mp3".into(), ".m4b".into()], Vec::new());
    let summary = scanner.scan_into(&catalog).await.unwrap();
    assert_eq!(summary.indexed, 3);
    (dir, catalog)
}

fn outcome(book_id: i64, tags: &[&str], description: Option<&str>, source: &str) -> EnrichmentOutcome {
    EnrichmentOutcome {
        book_id,
        applied_tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        description: description.map(str::to_string),
        raw_description: Some("Raw provider text".to_string()),
        source: source.to_string(),
    }
}

async fn book_id(catalog: &Catalog, title: &str) -> i64 {
    catalog
        .list_books(Some(title))
        .await
        .unwrap()
        .first()
        .map(|b| b.id)
        .unwrap()
}

#[tokio::test]
async fn test_scan_creates_books_and_targets() {
    let (_dir, catalog) = scanned_catalog().await;

    let books = catalog.list_books(None).await.unwrap();
    let titles: Vec<_> = books.iter().map(|b| b.title.as_str()).collect();
    assert_eq!(titles, vec!["Dune (Unabridged)", "Emma"]);

    let targets = catalog.book_targets(None).await.unwrap();
    assert_eq!(targets.len(), 2);
    let dune = targets.iter().find(|t| t.title.starts_with("Dune")).unwrap();
    assert_eq!(dune.author, "Frank Herbert");
    assert_eq!(dune.search_title(), "dune");
    assert_eq!(dune.search_author(), "frank herbert");

    let emma = targets.iter().find(|t| t.title == "Emma").unwrap();
    assert_eq!(emma.search_author(), "jane austen");

    let only = catalog.book_targets(Some(&[dune.book_id, 999])).await.unwrap();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].book_id, dune.book_id);
}

#[tokio::test]
async fn test_rescan_is_idempotent() {
    let (dir, catalog) = scanned_catalog().await;
    let scanner = LibraryScanner::new(vec![dir.path().join("library")], Vec::new(), Vec::new());
    scanner.scan_into(&catalog).await.unwrap();

    assert_eq!(catalog.list_books(None).await.unwrap().len(), 2);
    let id = book_id(&catalog, "Dune").await;
    let detail = catalog.book_detail(id).await.unwrap().unwrap();
    assert_eq!(detail.files.len(), 2);
}

#[tokio::test]
async fn test_list_books_filters_by_author() {
    let (_dir, catalog) = scanned_catalog().await;
    let books = catalog.list_books(Some("austen")).await.unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].title, "Emma");
    assert!(catalog.list_books(Some("tolkien")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_apply_outcome_replaces_non_topic_tags() {
    let (_dir, catalog) = scanned_catalog().await;
    let id = book_id(&catalog, "Dune").await;

    catalog
        .apply_outcome(&outcome(
            id,
            &["topic:Science Fiction", "Genre:Epic", "Mode:  slow   burn"],
            Some("A desert planet."),
            "google_books",
        ))
        .await
        .unwrap();

    let detail = catalog.book_detail(id).await.unwrap().unwrap();
    assert_eq!(detail.tags, vec!["Genre:Epic", "Mode: slow burn", "topic:Science Fiction"]);
    assert_eq!(detail.description.as_deref(), Some("A desert planet."));
    assert_eq!(detail.raw_description.as_deref(), Some("Raw provider text"));
    assert_eq!(detail.metadata_source.as_deref(), Some("google_books"));

    // Second pass: inferred tags are replaced, topics are kept, existing
    // tags are reused case-insensitively
    catalog
        .apply_outcome(&outcome(id, &["genre:epic"], None, "other"))
        .await
        .unwrap();
    let detail = catalog.book_detail(id).await.unwrap().unwrap();
    assert_eq!(detail.tags, vec!["Genre:Epic", "topic:Science Fiction"]);
    assert_eq!(detail.description.as_deref(), Some("A desert planet."));
}

#[tokio::test]
async fn test_apply_outcome_unknown_book_fails() {
    let (_dir, catalog) = scanned_catalog().await;
    let err = catalog
        .apply_outcome(&outcome(4242, &["Genre:Epic"], Some("x"), "google_books"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("4242"));
    assert!(matches!(
        err.downcast_ref::<EnrichmentError>(),
        Some(EnrichmentError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_tag_maintenance() {
    let (_dir, catalog) = scanned_catalog().await;
    let dune = book_id(&catalog, "Dune").await;
    let emma = book_id(&catalog, "Emma").await;

    catalog
        .apply_outcome(&outcome(dune, &["Genre:Epic", "Genre:Space"], None, "google_books"))
        .await
        .unwrap();
    catalog
        .apply_outcome(&outcome(emma, &["Genre:Romance"], None, "google_books"))
        .await
        .unwrap();
    // Drops Genre:Space from dune, leaving it unused
    catalog
        .apply_outcome(&outcome(dune, &["Genre:Epic"], None, "google_books"))
        .await
        .unwrap();

    assert_eq!(catalog.clean_unused_tags().await.unwrap(), 1);
    assert_eq!(catalog.clean_unused_tags().await.unwrap(), 0);
    assert_eq!(catalog.clear_all_tags().await.unwrap(), 2);
    assert!(catalog.book_tags(dune).await.unwrap().is_empty());

    let activity = catalog.recent_activity(10).await.unwrap();
    let actions: Vec<_> = activity.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec!["tags_clear", "tags_cleanup", "tags_cleanup", "scan"]);
}

#[tokio::test]
async fn test_missing_book_detail() {
    let (_dir, catalog) = scanned_catalog().await;
    assert!(catalog.book_detail(9999).await.unwrap().is_none());
}
