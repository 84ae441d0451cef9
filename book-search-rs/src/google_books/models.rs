use crate::models::Volume;
use serde::Deserialize;

/// `GET /volumes` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumesResponse {
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub items: Vec<VolumeItem>,
}

/// `GET /volumes/{id}` response, also the element type of `items`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub volume_info: VolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub published_date: Option<String>,
    #[serde(default)]
    pub industry_identifiers: Vec<IndustryIdentifier>,
}

#[derive(Debug, Deserialize)]
pub struct IndustryIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub identifier: String,
}

impl VolumeItem {
    pub fn convert(self) -> Volume {
        let info = self.volume_info;
        let isbn = |kind: &str| {
            info.industry_identifiers
                .iter()
                .find(|id| id.kind == kind)
                .map(|id| id.identifier.clone())
        };
        let isbn10 = isbn("ISBN_10");
        let isbn13 = isbn("ISBN_13");

        Volume {
            id: self.id,
            title: info.title,
            authors: info.authors,
            description: info.description,
            categories: info.categories,
            published_date: info.published_date,
            isbn10,
            isbn13,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_search_response_conversion() {
        let body = r#"{
            "kind": "books#volumes",
            "totalItems": 2,
            "items": [
                {
                    "id": "abc123",
                    "volumeInfo": {
                        "title": "Dune",
                        "authors": ["Frank Herbert"],
                        "description": "Desert planet.",
                        "categories": ["Fiction / Science Fiction / General"],
                        "publishedDate": "1965",
                        "industryIdentifiers": [
                            {"type": "ISBN_10", "identifier": "0441013597"},
                            {"type": "ISBN_13", "identifier": "9780441013593"}
                        ]
                    }
                },
                {
                    "id": "bare",
                    "volumeInfo": {}
                }
            ]
        }"#;

        let response: VolumesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.total_items, 2);

        let volumes: Vec<Volume> = response.items.into_iter().map(VolumeItem::convert).collect();
        assert_eq!(volumes[0].title.as_deref(), Some("Dune"));
        assert_eq!(volumes[0].author_line().as_deref(), Some("Frank Herbert"));
        assert_eq!(volumes[0].isbn13.as_deref(), Some("9780441013593"));
        assert_eq!(volumes[1].title, None);
        assert!(volumes[1].categories.is_empty());
    }

    #[test]
    fn test_empty_search_response() {
        let response: VolumesResponse =
            serde_json::from_str(r#"{"kind": "books#volumes", "totalItems": 0}"#).unwrap();
        assert!(response.items.is_empty());
    }
}
