use std::sync::Arc;

use thiserror::Error;

use crate::cache::{AnalysisCache, Lookup};
use crate::chords::transform;
use crate::detect::{BeatTracker, ChordDetector, DetectionError, analyze_track};
use crate::lyrics::lrclib::{LyricsLookup, LyricsProvider};
use crate::lyrics::{Arrangement, arrange};
use crate::model::{ChordSheet, LyricsStatus, Mode, RawAnalysis};

/// Only detection problems abort a request; everything else degrades.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Parameters of one sheet request.
#[derive(Debug, Clone, Default)]
pub struct SheetRequest {
    pub track_id: String,
    pub transpose: i32,
    pub mode: Mode,
    /// Per-request lyric overrides. Used for this response only.
    pub plain_lyrics: Option<String>,
    pub lrc_lyrics: Option<String>,
    /// Search terms for the lyrics provider.
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl SheetRequest {
    pub fn new(track_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            ..Default::default()
        }
    }

    fn has_override(&self) -> bool {
        non_blank(self.plain_lyrics.as_deref()).is_some()
            || non_blank(self.lrc_lyrics.as_deref()).is_some()
    }
}

/// Lyrics chosen for one response, and where they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetLyrics {
    pub plain: Option<String>,
    pub lrc: Option<String>,
    pub status: LyricsStatus,
}

impl SheetLyrics {
    fn none(status: LyricsStatus) -> Self {
        Self {
            plain: None,
            lrc: None,
            status,
        }
    }
}

/// Builds chord sheets: cached analysis (or one detection run), then
/// transpose/mode, then lyric arrangement.
pub struct SheetService {
    cache: Arc<AnalysisCache>,
    detector: Arc<dyn ChordDetector>,
    tracker: Arc<dyn BeatTracker>,
    lyrics: Option<Arc<dyn LyricsProvider>>,
}

impl SheetService {
    pub fn new(
        cache: Arc<AnalysisCache>,
        detector: Arc<dyn ChordDetector>,
        tracker: Arc<dyn BeatTracker>,
    ) -> Self {
        Self {
            cache,
            detector,
            tracker,
            lyrics: None,
        }
    }

    pub fn with_lyrics_provider(mut self, provider: Arc<dyn LyricsProvider>) -> Self {
        self.lyrics = Some(provider);
        self
    }

    pub fn cache(&self) -> &Arc<AnalysisCache> {
        &self.cache
    }

    /// The raw analysis for a track, detecting it at most once across
    /// concurrent callers.
    pub async fn analysis(&self, track_id: &str) -> Result<Lookup, PipelineError> {
        if track_id.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("empty track id".into()));
        }
        let detector = Arc::clone(&self.detector);
        let tracker = Arc::clone(&self.tracker);
        let id = track_id.to_string();

        let lookup = self
            .cache
            .get_or_compute(track_id, move || async move {
                tokio::task::spawn_blocking(move || {
                    analyze_track(detector.as_ref(), tracker.as_ref(), &id)
                })
                .await
                .unwrap_or_else(|e| {
                    Err(DetectionError::Failure(format!("detection worker failed: {e}")))
                })
            })
            .await?;
        Ok(lookup)
    }

    pub async fn sheet(&self, request: &SheetRequest) -> Result<ChordSheet, PipelineError> {
        let lookup = self.analysis(&request.track_id).await?;
        let lyrics = self.resolve_lyrics(request, &lookup.analysis).await;
        Ok(render(
            &lookup.analysis,
            request.transpose,
            request.mode,
            &lyrics,
            lookup.cached,
        ))
    }

    /// Override, then cached, then provider lookup (attached on success).
    async fn resolve_lyrics(&self, request: &SheetRequest, raw: &RawAnalysis) -> SheetLyrics {
        if request.has_override() {
            return SheetLyrics {
                plain: non_blank(request.plain_lyrics.as_deref()),
                lrc: non_blank(request.lrc_lyrics.as_deref()),
                status: LyricsStatus::Override,
            };
        }
        if raw.has_lyrics() {
            return SheetLyrics {
                plain: raw.plain_lyrics.clone(),
                lrc: raw.lrc_lyrics.clone(),
                status: LyricsStatus::Cached,
            };
        }

        let (Some(provider), Some(title)) = (&self.lyrics, non_blank(request.title.as_deref()))
        else {
            return SheetLyrics::none(LyricsStatus::None);
        };

        let provider = Arc::clone(provider);
        let artist = non_blank(request.artist.as_deref());
        let query = title.clone();
        let lookup =
            tokio::task::spawn_blocking(move || provider.search(&query, artist.as_deref())).await;

        let record = match lookup {
            Ok(Ok(LyricsLookup::Found(record))) => record,
            Ok(Ok(LyricsLookup::NotFound)) => {
                log::info!("No lyrics found for {title:?}");
                return SheetLyrics::none(LyricsStatus::NotFound);
            }
            Ok(Err(e)) => {
                log::warn!("Lyrics lookup for {title:?} failed: {e}");
                return SheetLyrics::none(LyricsStatus::NotFound);
            }
            Err(e) => {
                log::warn!("Lyrics lookup for {title:?} did not complete: {e}");
                return SheetLyrics::none(LyricsStatus::NotFound);
            }
        };

        let cache = Arc::clone(&self.cache);
        let id = request.track_id.clone();
        let (plain, lrc) = (record.plain_lyrics.clone(), record.lrc_lyrics.clone());
        let attached = tokio::task::spawn_blocking(move || {
            cache.attach_lyrics(&id, plain.as_deref(), lrc.as_deref())
        })
        .await;
        match attached {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::warn!("Could not cache lyrics for {}: {e}", request.track_id),
            Err(e) => log::warn!("Lyrics cache write for {} did not complete: {e}", request.track_id),
        }

        SheetLyrics {
            plain: record.plain_lyrics,
            lrc: record.lrc_lyrics,
            status: LyricsStatus::Fetched,
        }
    }
}

/// Assemble the response record from a raw analysis. Pure; the raw
/// segments are never modified.
pub fn render(
    raw: &RawAnalysis,
    transpose: i32,
    mode: Mode,
    lyrics: &SheetLyrics,
    cached: bool,
) -> ChordSheet {
    let chords = transform(raw.segments(), transpose, mode);
    let Arrangement { aligned, plain } =
        arrange(&chords, lyrics.plain.as_deref(), lyrics.lrc.as_deref());

    ChordSheet {
        track_id: raw.track_id.clone(),
        transpose,
        mode,
        chords,
        beat_info: raw.beat_grid().clone(),
        aligned_lyrics: aligned,
        plain_sheet: plain,
        lyrics: lyrics.status,
        cached,
    }
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
