//! Media retrieval into session storage.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use jukebox_proto::config::CatalogConfig;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use crate::catalog::{build_client, CatalogTrack};

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Write the track's encoded audio to `dest`.  `Ok` means the file is
    /// complete; on error nothing is left at `dest`.
    async fn fetch(&self, track: &CatalogTrack, dest: &Path) -> anyhow::Result<()>;
}

/// Streams `GET {base}/tracks/{id}/audio?bitrate_kbps=` to disk.
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    bitrate_kbps: u32,
}

impl HttpFetcher {
    pub fn new(config: &CatalogConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bitrate_kbps: config.bitrate_kbps,
        })
    }

    async fn download(&self, track: &CatalogTrack, part: &Path) -> anyhow::Result<u64> {
        let url = format!("{}/tracks/{}/audio", self.base_url, track.id);
        let response = self
            .client
            .get(&url)
            .query(&[("bitrate_kbps", self.bitrate_kbps)])
            .send()
            .await
            .context("audio request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("audio endpoint returned status {}", status);
        }

        let byte_stream = response
            .bytes_stream()
            .map(|result| result.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        let mut reader = StreamReader::new(Box::pin(byte_stream));

        let mut file = tokio::fs::File::create(part)
            .await
            .with_context(|| format!("cannot create {}", part.display()))?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        if written == 0 {
            anyhow::bail!("audio endpoint returned an empty body");
        }
        Ok(written)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    dest.with_extension("part")
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, track: &CatalogTrack, dest: &Path) -> anyhow::Result<()> {
        let part = part_path(dest);
        debug!("fetcher: '{}' → {}", track.title, part.display());

        match self.download(track, &part).await {
            Ok(bytes) => {
                tokio::fs::rename(&part, dest).await?;
                info!("fetcher: '{}' done, {} bytes", track.title, bytes);
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::catalog_track;
    use axum::extract::Path as UrlPath;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    async fn audio(UrlPath(id): UrlPath<String>) -> (StatusCode, Vec<u8>) {
        match id.as_str() {
            "ok" => (StatusCode::OK, b"ID3 audio".to_vec()),
            "empty" => (StatusCode::OK, Vec::new()),
            _ => (StatusCode::NOT_FOUND, Vec::new()),
        }
    }

    async fn serve_audio() -> HttpFetcher {
        let app = Router::new().route("/tracks/:id/audio", get(audio));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        HttpFetcher::new(&CatalogConfig {
            base_url: format!("http://{}/", addr),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn partial_download_sits_beside_destination() {
        let dest = Path::new("/media/session/ABCDEFGHIJ.mp3");
        assert_eq!(
            part_path(dest),
            PathBuf::from("/media/session/ABCDEFGHIJ.part")
        );
    }

    #[tokio::test]
    async fn completed_download_is_renamed_into_place() {
        let fetcher = serve_audio().await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("ABCDEFGHIJ.mp3");

        fetcher
            .fetch(&catalog_track("ok", "Da Funk", "Daft Punk"), &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"ID3 audio");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn failed_download_leaves_nothing_behind() {
        let fetcher = serve_audio().await;
        for id in ["missing", "empty"] {
            let dir = TempDir::new().unwrap();
            let dest = dir.path().join("ABCDEFGHIJ.mp3");

            let result = fetcher
                .fetch(&catalog_track(id, "Da Funk", "Daft Punk"), &dest)
                .await;
            assert!(result.is_err(), "{} should fail", id);
            assert!(!dest.exists());
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        }
    }
}
