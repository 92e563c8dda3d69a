use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::beats::{BeatGridError, check_series};

/// Label the detector emits when no chord is sounding.
pub const NO_CHORD: &str = "N";

/// Tolerance used when comparing segment boundaries against the track duration.
const COVERAGE_EPSILON: f64 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvariantError {
    #[error("duration must be positive and finite, got {0}")]
    Duration(f64),
    #[error("analysis has no segments")]
    Empty,
    #[error("segment {index} is empty or reversed ({start}..{end})")]
    Reversed { index: usize, start: f64, end: f64 },
    #[error("gap or overlap after segment {index}")]
    NotContiguous { index: usize },
    #[error("segments cover {start}..{end}, expected 0..{duration}")]
    Coverage { start: f64, end: f64, duration: f64 },
    #[error("beat grid: {0}")]
    BeatGrid(#[from] BeatGridError),
}

/// One fixed-hop detector sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordFrame {
    pub timestamp: f64,
    pub label: String,
}

impl ChordFrame {
    pub fn new(timestamp: f64, label: impl Into<String>) -> Self {
        Self {
            timestamp,
            label: label.into(),
        }
    }
}

/// A maximal time span with one stable chord label, `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordSegment {
    pub start: f64,
    pub end: f64,
    pub label: String,
}

impl ChordSegment {
    pub fn new(start: f64, end: f64, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && t < self.end
    }

    pub fn is_no_chord(&self) -> bool {
        is_no_chord(&self.label)
    }
}

/// True for the detector's "no chord" markers.
pub fn is_no_chord(label: &str) -> bool {
    matches!(label, NO_CHORD | "X" | "")
}

/// Check that `segments` are sorted, contiguous and cover exactly `[0, duration)`.
pub fn check_coverage(segments: &[ChordSegment], duration: f64) -> Result<(), InvariantError> {
    if !duration.is_finite() || duration <= 0.0 {
        return Err(InvariantError::Duration(duration));
    }
    let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
        return Err(InvariantError::Empty);
    };
    for (index, s) in segments.iter().enumerate() {
        if !(s.start < s.end) {
            return Err(InvariantError::Reversed {
                index,
                start: s.start,
                end: s.end,
            });
        }
    }
    for (index, pair) in segments.windows(2).enumerate() {
        if pair[0].end != pair[1].start {
            return Err(InvariantError::NotContiguous { index });
        }
    }
    if first.start != 0.0 || (last.end - duration).abs() > COVERAGE_EPSILON {
        return Err(InvariantError::Coverage {
            start: first.start,
            end: last.end,
            duration,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

/// Normalized tempo, meter and beat positions for one track.
/// Built by [`crate::beats::build_beat_grid`], which enforces ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatGrid {
    pub tempo: f64,
    pub time_signature: TimeSignature,
    pub beats: Vec<f64>,
    pub downbeats: Vec<f64>,
}

/// A lyric line; `timestamp` is present for LRC input only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricLine {
    pub timestamp: Option<f64>,
    pub text: String,
}

/// One lyric line bound to the chord sounding at its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedLine {
    pub timestamp: f64,
    pub chord: String,
    pub text: String,
}

/// The chord-side payload of an analysis. Never changes once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordData {
    pub segments: Vec<ChordSegment>,
    pub beat_grid: BeatGrid,
    pub duration: f64,
}

/// Merged, untransposed analysis of one track, as held by the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnalysis {
    pub track_id: String,
    #[serde(flatten)]
    pub chords: ChordData,
    pub plain_lyrics: Option<String>,
    pub lrc_lyrics: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RawAnalysis {
    /// Build a record, rejecting segment lists that break the coverage invariant
    /// and beat grids that are out of order.
    pub fn new(
        track_id: impl Into<String>,
        segments: Vec<ChordSegment>,
        beat_grid: BeatGrid,
        duration: f64,
    ) -> Result<Self, InvariantError> {
        check_coverage(&segments, duration)?;
        check_grid(&beat_grid)?;
        Ok(Self {
            track_id: track_id.into(),
            chords: ChordData {
                segments,
                beat_grid,
                duration,
            },
            plain_lyrics: None,
            lrc_lyrics: None,
            created_at: Utc::now(),
        })
    }

    pub fn segments(&self) -> &[ChordSegment] {
        &self.chords.segments
    }

    pub fn beat_grid(&self) -> &BeatGrid {
        &self.chords.beat_grid
    }

    pub fn duration(&self) -> f64 {
        self.chords.duration
    }

    pub fn has_lyrics(&self) -> bool {
        self.plain_lyrics.is_some() || self.lrc_lyrics.is_some()
    }

    /// Re-validate after deserialization; a record failing this is treated as corrupt.
    pub fn validate(&self) -> Result<(), InvariantError> {
        check_coverage(&self.chords.segments, self.chords.duration)?;
        check_grid(&self.chords.beat_grid)
    }
}

fn check_grid(grid: &BeatGrid) -> Result<(), InvariantError> {
    check_series("beats", &grid.beats)?;
    check_series("downbeats", &grid.downbeats)?;
    Ok(())
}

/// Chord rendering mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Major/minor triads only.
    #[default]
    Simple,
    /// Labels as detected.
    Full,
}

/// Chord progression and lyric block, shown side by side without alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainSheet {
    pub chords_text: String,
    pub lyrics_text: String,
}

/// Where the lyrics in a sheet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LyricsStatus {
    Override,
    Cached,
    Fetched,
    NotFound,
    None,
}

/// The assembled response for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordSheet {
    pub track_id: String,
    pub transpose: i32,
    pub mode: Mode,
    pub chords: Vec<ChordSegment>,
    pub beat_info: BeatGrid,
    pub aligned_lyrics: Option<Vec<AlignedLine>>,
    pub plain_sheet: Option<PlainSheet>,
    pub lyrics: LyricsStatus,
    pub cached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> BeatGrid {
        BeatGrid {
            tempo: 120.0,
            time_signature: TimeSignature::default(),
            beats: vec![0.0, 0.5],
            downbeats: vec![0.0],
        }
    }

    #[test]
    fn test_coverage_accepts_contiguous_segments() {
        let segs = vec![
            ChordSegment::new(0.0, 2.0, "C"),
            ChordSegment::new(2.0, 5.0, "G"),
        ];
        assert!(check_coverage(&segs, 5.0).is_ok());
    }

    #[test]
    fn test_coverage_rejects_gap() {
        let segs = vec![
            ChordSegment::new(0.0, 2.0, "C"),
            ChordSegment::new(2.5, 5.0, "G"),
        ];
        assert_eq!(
            check_coverage(&segs, 5.0),
            Err(InvariantError::NotContiguous { index: 0 })
        );
    }

    #[test]
    fn test_coverage_rejects_short_span() {
        let segs = vec![ChordSegment::new(0.0, 4.0, "C")];
        assert!(matches!(
            check_coverage(&segs, 5.0),
            Err(InvariantError::Coverage { .. })
        ));
    }

    #[test]
    fn test_coverage_rejects_empty_and_bad_duration() {
        assert_eq!(check_coverage(&[], 1.0), Err(InvariantError::Empty));
        let segs = vec![ChordSegment::new(0.0, 1.0, "C")];
        assert_eq!(check_coverage(&segs, 0.0), Err(InvariantError::Duration(0.0)));
    }

    #[test]
    fn test_raw_analysis_new_validates() {
        let bad = RawAnalysis::new("abc", vec![ChordSegment::new(1.0, 1.0, "C")], grid(), 1.0);
        assert!(bad.is_err());

        let ok = RawAnalysis::new("abc", vec![ChordSegment::new(0.0, 1.0, "C")], grid(), 1.0)
            .unwrap();
        assert_eq!(ok.track_id, "abc");
        assert!(!ok.has_lyrics());
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unordered_beat_grid() {
        let mut raw =
            RawAnalysis::new("abc", vec![ChordSegment::new(0.0, 1.0, "C")], grid(), 1.0).unwrap();
        raw.chords.beat_grid.beats = vec![1.0, 0.5];
        assert_eq!(
            raw.validate(),
            Err(InvariantError::BeatGrid(BeatGridError::NotMonotonic {
                series: "beats",
                index: 1
            }))
        );

        raw.chords.beat_grid.beats = vec![0.0, 0.5];
        raw.chords.beat_grid.downbeats = vec![-1.0];
        assert!(matches!(raw.validate(), Err(InvariantError::BeatGrid(_))));

        let unordered = BeatGrid {
            downbeats: vec![0.5, 0.5],
            ..grid()
        };
        let err = RawAnalysis::new("abc", vec![ChordSegment::new(0.0, 1.0, "C")], unordered, 1.0)
            .unwrap_err();
        assert!(matches!(err, InvariantError::BeatGrid(_)));
    }

    #[test]
    fn test_raw_analysis_json_shape() {
        let raw = RawAnalysis::new("vid1", vec![ChordSegment::new(0.0, 1.0, "C")], grid(), 1.0)
            .unwrap();
        let json: serde_json::Value = serde_json::to_value(&raw).unwrap();
        assert_eq!(json["trackId"], "vid1");
        assert_eq!(json["duration"], 1.0);
        assert_eq!(json["beatGrid"]["timeSignature"]["numerator"], 4);
        assert!(json["segments"].is_array());
        assert!(json["lrcLyrics"].is_null());
    }

    #[test]
    fn test_mode_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Mode::Full).unwrap(), "\"full\"");
        let m: Mode = serde_json::from_str("\"simple\"").unwrap();
        assert_eq!(m, Mode::Simple);
    }

    #[test]
    fn test_no_chord_markers() {
        assert!(is_no_chord("N"));
        assert!(is_no_chord("X"));
        assert!(!is_no_chord("Am"));
    }
}
