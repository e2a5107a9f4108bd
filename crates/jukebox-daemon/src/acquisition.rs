//! Acquisition pipeline: query → choice list → selection → downloads → queue.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogAlbum, CatalogTrack};
use crate::chat::Reply;
use crate::error::{AgentError, CatalogError, Result};
use crate::fetcher::MediaFetcher;
use crate::session::Session;
use crate::track::TrackRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    /// Tracks and albums matching free text.
    Find,
    /// Albums of the best-matching artist, newest first.
    Artist,
}

/// One numbered entry of a choice list.
#[derive(Debug, Clone)]
enum Choice {
    Track(CatalogTrack),
    Album(CatalogAlbum),
}

pub struct Acquisition {
    catalog: Arc<dyn Catalog>,
    fetcher: Arc<dyn MediaFetcher>,
    search_limit: usize,
    selection_timeout: Duration,
}

impl Acquisition {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        fetcher: Arc<dyn MediaFetcher>,
        search_limit: usize,
        selection_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            search_limit,
            selection_timeout,
        }
    }

    /// Resolve, queue and start playback, reporting failures in chat.
    pub async fn run(&self, session: &Session, query: &str, kind: SearchKind) {
        if let Err(e) = self.resolve_and_queue(session, query, kind).await {
            debug!("acquisition: '{}' ended: {}", query, e);
            session.chat().say(e.user_message()).await;
        }
    }

    /// Returns how many records were appended.
    pub async fn resolve_and_queue(
        &self,
        session: &Session,
        query: &str,
        kind: SearchKind,
    ) -> Result<usize> {
        // Anything fetched after a leave is refused, even mid-selection.
        let epoch = session.queue().epoch().await;
        let choices = match kind {
            SearchKind::Find => self.find(query).await?,
            SearchKind::Artist => self.artist_albums(query).await?,
        };
        if choices.is_empty() {
            return Err(AgentError::NotFound(query.to_string()));
        }

        let reply = session.chat().listen().await;
        session.chat().say(render_choices(&choices, kind)).await;
        let choice = self.await_selection(reply, &choices).await?;

        let appended = match choice {
            Choice::Track(track) => {
                let was_playing = session.is_playing().await;
                match self.fetch_into(session, &track, epoch).await {
                    Ok(Some(record)) => {
                        if was_playing {
                            session
                                .chat()
                                .say(format!("{} added to the queue", record))
                                .await;
                        }
                        1
                    }
                    Ok(None) => 0,
                    Err(e) => return Err(e),
                }
            }
            Choice::Album(album) => {
                let tracks = self.catalog.album_tracks(&album.id).await?;
                let appended = self.fetch_album(session, &album, &tracks, epoch).await;
                session
                    .chat()
                    .say(format!("Tracks added to the queue: {}", appended))
                    .await;
                appended
            }
        };

        if appended > 0 {
            session.scheduler().ensure_running().await;
        }
        Ok(appended)
    }

    async fn find(&self, query: &str) -> Result<Vec<Choice>> {
        let (tracks, albums) = tokio::join!(
            self.catalog.search_tracks(query, self.search_limit),
            self.catalog.search_albums(query, self.search_limit),
        );
        let (tracks, albums) = match (tracks, albums) {
            (Err(e), Err(_)) => return Err(e.into()),
            (tracks, albums) => (
                degrade(tracks, "track", query),
                degrade(albums, "album", query),
            ),
        };

        Ok(tracks
            .into_iter()
            .map(Choice::Track)
            .chain(albums.into_iter().map(Choice::Album))
            .collect())
    }

    async fn artist_albums(&self, query: &str) -> Result<Vec<Choice>> {
        let artists = self.catalog.search_artists(query, 1).await?;
        let artist = match artists.into_iter().next() {
            Some(artist) => artist,
            None => return Ok(Vec::new()),
        };
        info!("acquisition: '{}' matched artist {}", query, artist.name);

        let mut albums = self.catalog.artist_albums(&artist.id).await?;
        // Undated releases go last.
        albums.sort_by(|a, b| b.year.cmp(&a.year));
        Ok(albums.into_iter().map(Choice::Album).collect())
    }

    async fn await_selection(&self, reply: Reply, choices: &[Choice]) -> Result<Choice> {
        let reply = tokio::time::timeout(self.selection_timeout, reply)
            .await
            .map_err(|_| AgentError::SelectionTimeout(self.selection_timeout.as_secs()))?
            .map_err(|_| AgentError::SelectionCancelled)?;

        let index: usize = reply
            .trim()
            .parse()
            .map_err(|_| AgentError::InvalidSelection(reply.clone()))?;
        index
            .checked_sub(1)
            .and_then(|i| choices.get(i))
            .cloned()
            .ok_or(AgentError::InvalidSelection(reply))
    }

    /// Sequential downloads in album order.  A failed track is reported and
    /// skipped.
    async fn fetch_album(
        &self,
        session: &Session,
        album: &CatalogAlbum,
        tracks: &[CatalogTrack],
        epoch: u64,
    ) -> usize {
        let mut appended = 0;
        for track in tracks {
            match self.fetch_into(session, track, epoch).await {
                Ok(Some(_)) => appended += 1,
                Ok(None) => {
                    debug!("acquisition: '{}' abandoned after leave", album.title);
                    break;
                }
                Err(e) => session.chat().say(e.user_message()).await,
            }
        }
        info!(
            "acquisition: album '{}' queued {}/{}",
            album.title,
            appended,
            tracks.len()
        );
        appended
    }

    /// Download one track and append it.  `Ok(None)` means the queue was
    /// cleared meanwhile and the file was thrown away.
    async fn fetch_into(
        &self,
        session: &Session,
        track: &CatalogTrack,
        epoch: u64,
    ) -> Result<Option<TrackRecord>> {
        let storage = session.storage();
        let _lease = storage.lease().await?;
        let dest = storage.allocate_path();

        if let Err(e) = self.fetcher.fetch(track, &dest).await {
            warn!("acquisition: fetch of '{}' failed: {:#}", track.title, e);
            return Err(AgentError::FetchFailure {
                title: track.title.clone(),
                reason: e.to_string(),
            });
        }

        let record = TrackRecord::new(dest, track.title.clone(), track.artist_name());
        match session.queue().append_for(epoch, record.clone()).await {
            Ok(()) => {
                debug!("acquisition: queued {}", record.location().display());
                Ok(Some(record))
            }
            Err(stale) => {
                storage.discard(stale.location()).await;
                Ok(None)
            }
        }
    }
}

fn degrade<T>(result: std::result::Result<Vec<T>, CatalogError>, kind: &str, query: &str) -> Vec<T> {
    result.unwrap_or_else(|e| {
        warn!("acquisition: {} search for '{}' failed: {}", kind, query, e);
        Vec::new()
    })
}

fn render_choices(choices: &[Choice], kind: SearchKind) -> String {
    let mut text = String::new();
    let mut in_albums = false;
    for (i, choice) in choices.iter().enumerate() {
        let n = i + 1;
        match choice {
            Choice::Track(track) => {
                if i == 0 {
                    text.push_str("Choose a track by sending its number:\n");
                }
                let _ = writeln!(text, "{}. **{}** by {}", n, track.title, track.artist_name());
            }
            Choice::Album(album) => {
                if !in_albums {
                    in_albums = true;
                    text.push_str("Choose an album by sending its number:\n");
                }
                match kind {
                    SearchKind::Artist => {
                        let year = album
                            .year
                            .map(|y| y.to_string())
                            .unwrap_or_else(|| "unknown year".to_string());
                        let _ = writeln!(
                            text,
                            "{}. **{}**, {}, tracks: {}",
                            n, album.title, year, album.track_count
                        );
                    }
                    SearchKind::Find => {
                        let _ = writeln!(
                            text,
                            "{}. **{}** by {}, tracks: {}",
                            n,
                            album.title,
                            album.artist_name().unwrap_or("unknown artist"),
                            album.track_count
                        );
                    }
                }
            }
        }
    }
    text
}
