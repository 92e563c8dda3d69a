pub mod store;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;

use crate::db::models::{AnalysisRow, CacheStats, LyricsUpdate};
use crate::db::{Database, DbError};
use crate::detect::DetectionError;
use crate::model::{ChordData, InvariantError, RawAnalysis};
use store::{ObjectStore, analysis_key};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("No analysis cached for {0}")]
    NotFound(String),
    #[error("Failed to encode analysis: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Why a stored record could not be used. Never leaves this module: a
/// corrupt record is reported as a miss.
#[derive(Error, Debug)]
enum Corrupt {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("{0}")]
    Invariant(#[from] InvariantError),
    #[error("record belongs to {0}")]
    WrongTrack(String),
}

type FlightResult = std::result::Result<Arc<RawAnalysis>, DetectionError>;
type FlightReceiver = watch::Receiver<Option<FlightResult>>;

enum Flight {
    Join(FlightReceiver),
    Lead(watch::Sender<Option<FlightResult>>, FlightReceiver),
}

/// Result of [`AnalysisCache::get_or_compute`].
#[derive(Debug, Clone)]
pub struct Lookup {
    pub analysis: Arc<RawAnalysis>,
    /// True when the analysis was read from a cache tier rather than computed.
    pub cached: bool,
}

/// Two-tier store of raw analyses keyed by track id, with single-flight
/// protection around the computation that fills it.
///
/// The local tier is a SQLite database; the optional remote tier is any
/// [`ObjectStore`]. Records are never evicted here.
pub struct AnalysisCache {
    local: Mutex<Database>,
    remote: Option<Arc<dyn ObjectStore>>,
    inflight: Mutex<HashMap<String, FlightReceiver>>,
    timeout: Duration,
}

impl AnalysisCache {
    /// `timeout` bounds each in-flight computation.
    pub fn new(local: Database, remote: Option<Arc<dyn ObjectStore>>, timeout: Duration) -> Self {
        Self {
            local: Mutex::new(local),
            remote,
            inflight: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a track: local tier first, then the remote tier with
    /// write-through to local. Corrupt records in either tier are misses.
    pub fn get(&self, track_id: &str) -> Result<Option<RawAnalysis>> {
        let row = self.db().get_analysis(track_id)?;
        if let Some(row) = row {
            match decode_row(row) {
                Ok(raw) => {
                    log::debug!("Local cache hit for {track_id}");
                    return Ok(Some(raw));
                }
                Err(e) => log::warn!("Corrupt local record for {track_id}, ignoring: {e}"),
            }
        }

        let Some(remote) = &self.remote else {
            log::debug!("Cache miss for {track_id}");
            return Ok(None);
        };
        let bytes = match remote.get(&analysis_key(track_id)) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                log::debug!("Cache miss for {track_id} (local and remote)");
                return Ok(None);
            }
            Err(e) => {
                log::warn!("Remote lookup for {track_id} failed, treating as miss: {e}");
                return Ok(None);
            }
        };
        let raw = match decode_remote(track_id, &bytes) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Corrupt remote record for {track_id}, ignoring: {e}");
                return Ok(None);
            }
        };

        let row = encode_row(&raw)?;
        match self.db().upsert_analysis(&row) {
            Ok(()) => log::info!("Remote cache hit for {track_id}, copied to local"),
            Err(e) => log::warn!("Remote cache hit for {track_id}, local copy failed: {e}"),
        }
        Ok(Some(raw))
    }

    /// Store an analysis under its own track id, replacing any earlier entry,
    /// and mirror it to the remote tier. A remote failure is logged only.
    pub fn put_raw(&self, analysis: &RawAnalysis) -> Result<()> {
        let row = encode_row(analysis)?;
        self.db().upsert_analysis(&row)?;
        log::debug!("Stored analysis for {}", analysis.track_id);
        self.mirror(analysis)
    }

    fn mirror(&self, analysis: &RawAnalysis) -> Result<()> {
        if let Some(remote) = &self.remote {
            let bytes = serde_json::to_vec(analysis)?;
            if let Err(e) = remote.put(&analysis_key(&analysis.track_id), &bytes) {
                log::warn!("Failed to mirror {} to remote store: {e}", analysis.track_id);
            }
        }
        Ok(())
    }

    /// Replace the lyric fields of an existing analysis. `None` leaves a
    /// field as it is; a blank string clears it. Chord data is untouched.
    pub fn attach_lyrics(
        &self,
        track_id: &str,
        plain: Option<&str>,
        lrc: Option<&str>,
    ) -> Result<RawAnalysis> {
        // Goes through `get` so a remote-only record is pulled local first.
        let mut raw = self
            .get(track_id)?
            .ok_or_else(|| CacheError::NotFound(track_id.to_string()))?;

        // Normalized once here; both tiers store exactly these values.
        let update = LyricsUpdate {
            plain_lyrics: plain.map(non_blank),
            lrc_lyrics: lrc.map(non_blank),
        };
        if !self.db().update_lyrics(track_id, &update)? {
            return Err(CacheError::NotFound(track_id.to_string()));
        }

        if let Some(plain) = update.plain_lyrics {
            raw.plain_lyrics = plain;
        }
        if let Some(lrc) = update.lrc_lyrics {
            raw.lrc_lyrics = lrc;
        }
        log::info!(
            "Attached lyrics to {track_id} (plain: {}, lrc: {})",
            raw.plain_lyrics.is_some(),
            raw.lrc_lyrics.is_some()
        );
        self.mirror(&raw)?;
        Ok(raw)
    }

    /// Local tier only; errors and corrupt rows count as a miss.
    fn get_local(&self, track_id: &str) -> Option<RawAnalysis> {
        let row = match self.db().get_analysis(track_id) {
            Ok(row) => row?,
            Err(e) => {
                log::debug!("Local re-check for {track_id} failed: {e}");
                return None;
            }
        };
        decode_row(row).ok()
    }

    fn register(&self, track_id: &str) -> Flight {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = inflight.get(track_id) {
            return Flight::Join(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        inflight.insert(track_id.to_string(), rx.clone());
        Flight::Lead(tx, rx)
    }

    /// Number of computations currently registered.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run `compute` for `track_id` unless a run is already in flight, in
    /// which case wait for that run instead. Every caller gets the same result.
    ///
    /// The computation runs on its own task: dropping the returned future does
    /// not cancel it, and a successful result is stored with [`put_raw`]
    /// before the registration is cleared. A run exceeding the cache timeout
    /// fails every waiter with [`DetectionError::Timeout`] and stores nothing.
    ///
    /// [`put_raw`]: AnalysisCache::put_raw
    pub async fn with_single_flight<F, Fut>(
        self: &Arc<Self>,
        track_id: &str,
        compute: F,
    ) -> std::result::Result<Arc<RawAnalysis>, DetectionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<RawAnalysis, DetectionError>> + Send + 'static,
    {
        self.run_flight(track_id, compute, false).await
    }

    /// With `recheck_local`, a new leader first looks at the local tier, so a
    /// caller that missed just before another leader stored its result does
    /// not detect the track again.
    async fn run_flight<F, Fut>(
        self: &Arc<Self>,
        track_id: &str,
        compute: F,
        recheck_local: bool,
    ) -> std::result::Result<Arc<RawAnalysis>, DetectionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<RawAnalysis, DetectionError>> + Send + 'static,
    {
        let mut rx = match self.register(track_id) {
            Flight::Join(rx) => {
                log::debug!("Joining in-flight analysis of {track_id}");
                rx
            }
            Flight::Lead(tx, rx) => {
                self.spawn_leader(track_id, tx, compute(), recheck_local);
                rx
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(DetectionError::Failure(format!(
                "analysis of {track_id} ended without a result"
            )))
        })
    }

    fn spawn_leader<Fut>(
        self: &Arc<Self>,
        track_id: &str,
        tx: watch::Sender<Option<FlightResult>>,
        work: Fut,
        recheck_local: bool,
    ) where
        Fut: Future<Output = std::result::Result<RawAnalysis, DetectionError>> + Send + 'static,
    {
        let guard = InflightGuard {
            cache: Arc::clone(self),
            key: track_id.to_string(),
        };
        let cache = Arc::clone(self);
        let id = track_id.to_string();
        let limit = self.timeout;

        tokio::spawn(async move {
            let stored = if recheck_local {
                let cache = Arc::clone(&cache);
                let id = id.clone();
                tokio::task::spawn_blocking(move || cache.get_local(&id))
                    .await
                    .ok()
                    .flatten()
            } else {
                None
            };

            let result = if let Some(raw) = stored {
                log::debug!("Analysis of {id} was stored meanwhile, skipping detection");
                Ok(Arc::new(raw))
            } else {
                match tokio::time::timeout(limit, work).await {
                    Ok(Ok(raw)) => {
                        let raw = Arc::new(raw);
                        let stored = Arc::clone(&raw);
                        match tokio::task::spawn_blocking(move || cache.put_raw(&stored)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => log::warn!("Failed to cache analysis of {id}: {e}"),
                            Err(e) => log::warn!("Cache write for {id} did not complete: {e}"),
                        }
                        Ok(raw)
                    }
                    Ok(Err(e)) => {
                        log::warn!("Analysis of {id} failed: {e}");
                        Err(e)
                    }
                    Err(_) => {
                        log::warn!("Analysis of {id} timed out after {limit:?}");
                        Err(DetectionError::Timeout(limit))
                    }
                }
            };
            // Deregister before publishing so a retry after failure starts afresh.
            drop(guard);
            tx.send_replace(Some(result));
        });
    }

    /// `get`, then single-flight detection on a miss. The leader re-checks the
    /// local tier before detecting.
    /// Local lookup errors are logged and treated as a miss.
    pub async fn get_or_compute<F, Fut>(
        self: &Arc<Self>,
        track_id: &str,
        compute: F,
    ) -> std::result::Result<Lookup, DetectionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<RawAnalysis, DetectionError>> + Send + 'static,
    {
        let cache = Arc::clone(self);
        let id = track_id.to_string();
        match tokio::task::spawn_blocking(move || cache.get(&id)).await {
            Ok(Ok(Some(raw))) => {
                return Ok(Lookup {
                    analysis: Arc::new(raw),
                    cached: true,
                });
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => log::warn!("Cache lookup for {track_id} failed, recomputing: {e}"),
            Err(e) => log::warn!("Cache lookup for {track_id} did not complete: {e}"),
        }

        let analysis = self.run_flight(track_id, compute, true).await?;
        Ok(Lookup {
            analysis,
            cached: false,
        })
    }

    pub fn stats(&self) -> Result<CacheStats> {
        Ok(self.db().stats()?)
    }

    pub fn list_track_ids(&self) -> Result<Vec<String>> {
        Ok(self.db().list_track_ids()?)
    }
}

/// Clears a single-flight registration when the leader task finishes or unwinds.
struct InflightGuard {
    cache: Arc<AnalysisCache>,
    key: String,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.cache
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn encode_row(raw: &RawAnalysis) -> Result<AnalysisRow> {
    Ok(AnalysisRow {
        track_id: raw.track_id.clone(),
        chord_data: serde_json::to_string(&raw.chords)?,
        plain_lyrics: raw.plain_lyrics.clone(),
        lrc_lyrics: raw.lrc_lyrics.clone(),
        created_at: raw.created_at.to_rfc3339(),
    })
}

fn decode_row(row: AnalysisRow) -> std::result::Result<RawAnalysis, Corrupt> {
    let chords: ChordData = serde_json::from_str(&row.chord_data)?;
    let created_at = DateTime::parse_from_rfc3339(&row.created_at)?.with_timezone(&Utc);
    let raw = RawAnalysis {
        track_id: row.track_id,
        chords,
        plain_lyrics: row.plain_lyrics,
        lrc_lyrics: row.lrc_lyrics,
        created_at,
    };
    raw.validate()?;
    Ok(raw)
}

fn decode_remote(track_id: &str, bytes: &[u8]) -> std::result::Result<RawAnalysis, Corrupt> {
    let raw: RawAnalysis = serde_json::from_slice(bytes)?;
    if raw.track_id != track_id {
        return Err(Corrupt::WrongTrack(raw.track_id));
    }
    raw.validate()?;
    Ok(raw)
}
