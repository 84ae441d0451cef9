use serde::{Deserialize, Serialize};

/// Search source enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchSource {
    #[serde(rename = "google_books")]
    GoogleBooks,
}

impl SearchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSource::GoogleBooks => "google_books",
        }
    }
}

/// Title/author query for a volume search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookQuery {
    pub title: Option<String>,
    pub author: Option<String>,
}

impl BookQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the title; blank titles are ignored
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        let trimmed = title.trim();
        self.title = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    /// Set the author; blank authors are ignored
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        let author = author.into();
        let trimmed = author.trim();
        self.author = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.author.is_none()
    }

    /// Render the query using Google Books field operators,
    /// e.g. `intitle:Dune inauthor:Frank Herbert`
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(title) = &self.title {
            parts.push(format!("intitle:{}", title));
        }
        if let Some(author) = &self.author {
            parts.push(format!("inauthor:{}", author));
        }
        parts.join(" ")
    }
}

/// A single volume returned by a search service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Volume {
    pub id: String,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub description: Option<String>,
    pub categories: Vec<String>,
    pub published_date: Option<String>,
    pub isbn10: Option<String>,
    pub isbn13: Option<String>,
}

impl Volume {
    /// Authors joined the way they are displayed in the catalog
    pub fn author_line(&self) -> Option<String> {
        if self.authors.is_empty() {
            None
        } else {
            Some(self.authors.join(", "))
        }
    }

    pub fn published_year(&self) -> Option<String> {
        self.published_date
            .as_deref()
            .and_then(|date| date.get(..4))
            .filter(|year| year.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_uses_field_operators() {
        let query = BookQuery::new()
            .with_title("The Hobbit")
            .with_author("J. R. R. Tolkien");
        assert_eq!(
            query.to_query_string(),
            "intitle:The Hobbit inauthor:J. R. R. Tolkien"
        );
    }

    #[test]
    fn test_blank_fields_are_dropped() {
        let query = BookQuery::new().with_title("  ").with_author("Le Guin");
        assert_eq!(query.title, None);
        assert_eq!(query.to_query_string(), "inauthor:Le Guin");
        assert!(BookQuery::new().with_title("").is_empty());
    }

    #[test]
    fn test_published_year() {
        let volume = Volume {
            published_date: Some("1965-08-01".to_string()),
            ..Default::default()
        };
        assert_eq!(volume.published_year().as_deref(), Some("1965"));

        let undated = Volume {
            published_date: Some("n.d.".to_string()),
            ..Default::default()
        };
        assert_eq!(undated.published_year(), None);
    }
}
