use crate::error::{BookSearchError, Result};
use crate::google_books::models::{VolumeItem, VolumesResponse};
use crate::models::{BookQuery, Volume};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/books/v1";
const DEFAULT_MAX_RESULTS: u32 = 10;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GoogleBooksApi {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_results: u32,
}

impl GoogleBooksApi {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_options(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT, DEFAULT_MAX_RESULTS)
    }

    pub fn with_options(
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        max_results: u32,
    ) -> Result<Self> {
        info!("Initializing Google Books API client");
        if api_key.is_some() {
            debug!("API key provided");
        } else {
            debug!("No API key provided, using anonymous quota");
        }

        Ok(Self {
            client: Client::builder()
                .timeout(timeout)
                .user_agent(concat!("book-search-rs/", env!("CARGO_PKG_VERSION")))
                .build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            max_results,
        })
    }

    /// Search volumes by title and/or author
    #[instrument(skip(self), fields(service = "google_books"))]
    pub async fn search(&self, query: &BookQuery) -> Result<Vec<Volume>> {
        if query.is_empty() {
            return Err(BookSearchError::InvalidQuery(
                "a title or an author is required".to_string(),
            ));
        }

        let q = query.to_query_string();
        info!("Searching volumes for '{}'", q);

        let mut params = vec![
            ("q", q),
            ("maxResults", self.max_results.to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("key", key.clone()));
        }

        let response = self
            .client
            .get(format!("{}/volumes", self.base_url))
            .header("Accept", "application/json")
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("Volume search failed with status {}", status);
            return Err(BookSearchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        let parsed: VolumesResponse = serde_json::from_str(&body)?;

        let volumes: Vec<Volume> = parsed
            .items
            .into_iter()
            .filter(|item| !item.id.is_empty())
            .map(VolumeItem::convert)
            .collect();

        info!("Search successful, found {} volumes", volumes.len());
        Ok(volumes)
    }

    /// Fetch a single volume by id
    #[instrument(skip(self), fields(service = "google_books"))]
    pub async fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        if volume_id.trim().is_empty() {
            return Err(BookSearchError::InvalidQuery("empty volume id".to_string()));
        }
        debug!("Fetching volume: {}", volume_id);

        let mut request = self
            .client
            .get(format!(
                "{}/volumes/{}",
                self.base_url,
                urlencoding::encode(volume_id)
            ))
            .header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BookSearchError::NotFound(volume_id.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BookSearchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let item: VolumeItem = serde_json::from_str(&response.text().await?)?;
        Ok(item.convert())
    }
}
