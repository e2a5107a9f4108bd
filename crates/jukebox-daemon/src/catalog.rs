//! Remote music catalog: search and album/artist expansion.

use std::time::Duration;

use async_trait::async_trait;
use jukebox_proto::config::CatalogConfig;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::CatalogError;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ArtistRef {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CatalogTrack {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
}

impl CatalogTrack {
    pub fn artist_name(&self) -> &str {
        primary_artist(&self.artists).unwrap_or("unknown artist")
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CatalogAlbum {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub track_count: usize,
}

impl CatalogAlbum {
    pub fn artist_name(&self) -> Option<&str> {
        primary_artist(&self.artists)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CatalogArtist {
    pub id: String,
    pub name: String,
}

fn primary_artist(artists: &[ArtistRef]) -> Option<&str> {
    artists.first().map(|a| a.name.as_str())
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn search_tracks(&self, query: &str, limit: usize)
        -> Result<Vec<CatalogTrack>, CatalogError>;

    async fn search_albums(&self, query: &str, limit: usize)
        -> Result<Vec<CatalogAlbum>, CatalogError>;

    async fn search_artists(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CatalogArtist>, CatalogError>;

    /// Tracks of the album's first volume, in album order.
    async fn album_tracks(&self, album_id: &str) -> Result<Vec<CatalogTrack>, CatalogError>;

    /// Albums released by the artist, in catalog order.
    async fn artist_albums(&self, artist_id: &str) -> Result<Vec<CatalogAlbum>, CatalogError>;
}

// ── HTTP catalog ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SearchPage<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Deserialize)]
struct AlbumTracks {
    #[serde(default)]
    volumes: Vec<Vec<CatalogTrack>>,
}

#[derive(Deserialize)]
struct ArtistAlbums {
    #[serde(default)]
    albums: Vec<CatalogAlbum>,
}

/// JSON-over-HTTP catalog client.
///
/// Endpoints, relative to `base_url`:
///   GET /search?text=&type=track|album|artist&page_size=   → { "results": [...] }
///   GET /albums/{id}/tracks                                → { "volumes": [[...]] }
///   GET /artists/{id}/albums                               → { "albums": [...] }
pub struct HttpCatalog {
    client: Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(config: &CatalogConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn search<T: DeserializeOwned>(
        &self,
        kind: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<T>, CatalogError> {
        let url = format!("{}/search", self.base_url);
        let page_size = limit.to_string();
        let page: SearchPage<T> = self
            .get_json(
                self.client
                    .get(&url)
                    .query(&[("text", query), ("type", kind), ("page_size", page_size.as_str())]),
            )
            .await?;
        debug!("catalog: {} search '{}' → {} results", kind, query, page.results.len());
        Ok(page.results.into_iter().take(limit).collect())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, CatalogError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

/// Shared by the catalog and the fetcher: timeout + optional token header.
pub fn build_client(config: &CatalogConfig) -> anyhow::Result<Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(token) = &config.token {
        let value = reqwest::header::HeaderValue::from_str(&format!("OAuth {}", token))?;
        headers.insert(reqwest::header::AUTHORIZATION, value);
    }
    let client = Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .default_headers(headers)
        .build()?;
    Ok(client)
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn search_tracks(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CatalogTrack>, CatalogError> {
        self.search("track", query, limit).await
    }

    async fn search_albums(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CatalogAlbum>, CatalogError> {
        self.search("album", query, limit).await
    }

    async fn search_artists(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CatalogArtist>, CatalogError> {
        self.search("artist", query, limit).await
    }

    async fn album_tracks(&self, album_id: &str) -> Result<Vec<CatalogTrack>, CatalogError> {
        let url = format!("{}/albums/{}/tracks", self.base_url, album_id);
        let album: AlbumTracks = self.get_json(self.client.get(&url)).await?;
        album
            .volumes
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::UnknownId(album_id.to_string()))
    }

    async fn artist_albums(&self, artist_id: &str) -> Result<Vec<CatalogAlbum>, CatalogError> {
        let url = format!("{}/artists/{}/albums", self.base_url, artist_id);
        let listing: ArtistAlbums = self.get_json(self.client.get(&url)).await?;
        Ok(listing.albums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path as UrlPath, Query};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Json, Response};
    use axum::routing::get;
    use axum::Router;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    // Track search works; album search is down.
    async fn search(Query(params): Query<HashMap<String, String>>) -> Response {
        match params.get("type").map(String::as_str) {
            Some("track") => Json(json!({
                "results": [
                    {"id": "t1", "title": "Da Funk", "artists": [{"name": "Daft Punk"}]},
                    {"id": "t2", "title": "Around the World", "artists": [{"name": "Daft Punk"}]}
                ]
            }))
            .into_response(),
            _ => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        }
    }

    async fn album_tracks(UrlPath(id): UrlPath<String>) -> Json<Value> {
        match id.as_str() {
            "al1" => Json(json!({"volumes": [[{"id": "h1", "title": "Revolution 909"}]]})),
            _ => Json(json!({"volumes": []})),
        }
    }

    async fn serve_catalog() -> HttpCatalog {
        let app = Router::new()
            .route("/search", get(search))
            .route("/albums/:id/tracks", get(album_tracks));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        HttpCatalog::new(&CatalogConfig {
            base_url: format!("http://{}", addr),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn search_results_are_capped_at_limit() {
        let catalog = serve_catalog().await;
        let tracks = catalog.search_tracks("daft punk", 1).await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "Da Funk");
        assert_eq!(tracks[0].artist_name(), "Daft Punk");
    }

    #[tokio::test]
    async fn error_status_maps_to_catalog_error() {
        let catalog = serve_catalog().await;
        let err = catalog.search_albums("daft punk", 4).await.unwrap_err();
        assert!(matches!(err, CatalogError::Status(503)));
    }

    #[tokio::test]
    async fn album_without_volumes_is_unknown() {
        let catalog = serve_catalog().await;
        let tracks = catalog.album_tracks("al1").await.unwrap();
        assert_eq!(tracks[0].title, "Revolution 909");

        let err = catalog.album_tracks("gone").await.unwrap_err();
        assert!(matches!(err, CatalogError::UnknownId(id) if id == "gone"));
    }

    #[test]
    fn album_payload_parses_first_volume() {
        let raw = r#"{
            "volumes": [
                [
                    {"id": "1", "title": "Intro", "artists": [{"id": "9", "name": "Air"}]},
                    {"id": "2", "title": "Outro"}
                ],
                [{"id": "3", "title": "Bonus"}]
            ]
        }"#;
        let album: AlbumTracks = serde_json::from_str(raw).unwrap();
        let first = &album.volumes[0];
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].artist_name(), "Air");
        assert_eq!(first[1].artist_name(), "unknown artist");
    }

    #[test]
    fn search_page_tolerates_missing_fields() {
        let raw = r#"{"results": [{"id": "a1", "title": "Moon Safari"}]}"#;
        let page: SearchPage<CatalogAlbum> = serde_json::from_str(raw).unwrap();
        assert_eq!(page.results[0].year, None);
        assert_eq!(page.results[0].track_count, 0);
        assert!(page.results[0].artist_name().is_none());

        let empty: SearchPage<CatalogAlbum> = serde_json::from_str("{}").unwrap();
        assert!(empty.results.is_empty());
    }
}
