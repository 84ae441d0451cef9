use audiobook_station::enrichment::scoring::{author_similarity, confidence_score, desc_score, title_token_overlap};
use audiobook_station::normalize::{normalize_author, normalize_title};

#[test]
fn test_title_drops_series_markers() {
    assert_eq!(
        normalize_title("The Way of Kings (Stormlight Archive, Book 1)").as_deref(),
        Some("the way of kings")
    );
    assert_eq!(normalize_title("Mistborn #2: The Well of Ascension").as_deref(), Some("mistborn the well of ascension"));
    assert_eq!(normalize_title("01 Dune").as_deref(), Some("dune"));
}

#[test]
fn test_title_ampersand_and_accents() {
    assert_eq!(normalize_title("Pride & Prejudice").as_deref(), Some("pride and prejudice"));
    assert_eq!(normalize_title("Les Misérables").as_deref(), Some("les miserables"));
}

#[test]
fn test_empty_titles() {
    assert_eq!(normalize_title(""), None);
    assert_eq!(normalize_title("(Unabridged)"), None);
    assert_eq!(normalize_title("Volume 3"), None);
}

#[test]
fn test_author_forms() {
    assert_eq!(normalize_author("Austen, Jane").as_deref(), Some("jane austen"));
    assert_eq!(normalize_author("Brontë, Charlotte").as_deref(), Some("charlotte bronte"));
    assert_eq!(
        normalize_author("Terry Pratchett & Neil Gaiman").as_deref(),
        Some("terry pratchett and neil gaiman")
    );
    assert_eq!(normalize_author("Stephen King [Narrator]").as_deref(), Some("stephen king"));
    assert_eq!(normalize_author(""), None);
}

#[test]
fn test_similarity_scores() {
    assert_eq!(author_similarity("Jane Austen", "Austen, Jane"), 1.0);
    assert_eq!(author_similarity("Jane Austen", ""), 0.0);
    assert_eq!(title_token_overlap("Dune", "Dune Messiah"), 1.0);
    assert_eq!(title_token_overlap("Dune Messiah", "Dune"), 0.5);
}

#[test]
fn test_confidence_combines_identity_and_description() {
    assert_eq!(desc_score(None), 0.0);
    let medium = "x".repeat(400);
    let long = "x".repeat(2000);
    assert_eq!(desc_score(Some(medium.as_str())), 0.5);
    assert_eq!(desc_score(Some(long.as_str())), 1.0);

    let score = confidence_score("Emma", "Jane Austen", Some("Emma"), Some("Jane Austen"), Some(medium.as_str()));
    assert_eq!(score.identity, 1.0);
    assert_eq!(score.description, 0.5);
    assert_eq!(score.overall, 0.5);
}
