use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LyricsError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Failed to parse lyrics response: {0}")]
    Parse(String),
}

/// Lyrics found for a track. Either field may be missing.
#[derive(Debug, Clone, PartialEq)]
pub struct LyricsRecord {
    pub track_name: String,
    pub artist_name: String,
    pub album_name: Option<String>,
    pub plain_lyrics: Option<String>,
    pub lrc_lyrics: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LyricsLookup {
    Found(LyricsRecord),
    NotFound,
}

/// A lyrics search backend.
pub trait LyricsProvider: Send + Sync {
    fn search(&self, title: &str, artist: Option<&str>) -> Result<LyricsLookup, LyricsError>;
}

/// LRCLIB track entry; only the fields used here.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LrclibTrack {
    track_name: Option<String>,
    artist_name: Option<String>,
    album_name: Option<String>,
    plain_lyrics: Option<String>,
    synced_lyrics: Option<String>,
}

impl LrclibTrack {
    fn has_lyrics(&self) -> bool {
        non_blank(&self.plain_lyrics).is_some() || non_blank(&self.synced_lyrics).is_some()
    }

    fn into_record(self, title: &str, artist: Option<&str>) -> LyricsRecord {
        LyricsRecord {
            plain_lyrics: non_blank(&self.plain_lyrics),
            lrc_lyrics: non_blank(&self.synced_lyrics),
            track_name: self.track_name.unwrap_or_else(|| title.to_string()),
            artist_name: self
                .artist_name
                .unwrap_or_else(|| artist.unwrap_or_default().to_string()),
            album_name: self.album_name,
        }
    }
}

fn non_blank(s: &Option<String>) -> Option<String> {
    s.as_ref().filter(|s| !s.trim().is_empty()).cloned()
}

/// Client for the LRCLIB public lyrics API (no key required).
pub struct LrclibClient {
    agent: ureq::Agent,
    base_url: String,
    user_agent: String,
}

impl LrclibClient {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    /// Exact lookup by title (and artist when known).
    fn get_exact(&self, title: &str, artist: Option<&str>) -> Result<Option<LrclibTrack>, LyricsError> {
        let url = format!("{}/get", self.base_url);
        log::debug!("Fetching {url} for {title:?}");

        let mut request = self
            .agent
            .get(&url)
            .header("User-Agent", self.user_agent.as_str())
            .query("track_name", title);
        if let Some(artist) = artist.filter(|a| !a.is_empty()) {
            request = request.query("artist_name", artist);
        }

        match request.call() {
            Ok(mut response) => {
                let track: LrclibTrack = response
                    .body_mut()
                    .read_json()
                    .map_err(|e| LyricsError::Parse(e.to_string()))?;
                Ok(track.has_lyrics().then_some(track))
            }
            Err(ureq::Error::StatusCode(404)) => Ok(None),
            Err(e) => Err(LyricsError::Http(e.to_string())),
        }
    }

    /// Free-text search; first hit carrying any lyrics wins.
    fn search_any(&self, title: &str, artist: Option<&str>) -> Result<Option<LrclibTrack>, LyricsError> {
        let url = format!("{}/search", self.base_url);
        let query = format!("{} {}", artist.unwrap_or_default(), title)
            .trim()
            .to_string();
        log::debug!("Searching {url} for {query:?}");

        let results: Vec<LrclibTrack> = match self
            .agent
            .get(&url)
            .header("User-Agent", self.user_agent.as_str())
            .query("q", &query)
            .call()
        {
            Ok(mut response) => response
                .body_mut()
                .read_json()
                .map_err(|e| LyricsError::Parse(e.to_string()))?,
            Err(ureq::Error::StatusCode(404)) => Vec::new(),
            Err(e) => return Err(LyricsError::Http(e.to_string())),
        };

        Ok(results.into_iter().find(LrclibTrack::has_lyrics))
    }
}

impl LyricsProvider for LrclibClient {
    fn search(&self, title: &str, artist: Option<&str>) -> Result<LyricsLookup, LyricsError> {
        // An exact-lookup failure still leaves the search endpoint to try.
        let exact = match self.get_exact(title, artist) {
            Ok(hit) => hit,
            Err(e) => {
                log::warn!("LRCLIB exact lookup failed for {title:?}: {e}");
                None
            }
        };

        let hit = match exact {
            Some(track) => Some(track),
            None => self.search_any(title, artist)?,
        };

        Ok(match hit {
            Some(track) => LyricsLookup::Found(track.into_record(title, artist)),
            None => LyricsLookup::NotFound,
        })
    }
}
