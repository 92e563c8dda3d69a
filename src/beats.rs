use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BeatGrid, TimeSignature};

/// Max distance (seconds) between a downbeat and the beat it sits on.
pub const DOWNBEAT_TOLERANCE_SECS: f64 = 0.05;

/// Tempo used when neither the tracker nor the beats give one.
const DEFAULT_TEMPO: f64 = 120.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BeatGridError {
    #[error("{series}[{index}] is not a finite, non-negative time")]
    InvalidTime { series: &'static str, index: usize },
    #[error("{series} not strictly increasing at index {index}")]
    NotMonotonic { series: &'static str, index: usize },
}

/// Beat tracker output as delivered, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBeats {
    pub tempo: Option<f64>,
    pub time_signature: Option<TimeSignature>,
    pub beats: Vec<f64>,
    pub downbeats: Vec<f64>,
}

/// One bar, from its downbeat to the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub number: usize,
    pub start: f64,
    pub end: f64,
}

/// Normalize tracker output into a [`BeatGrid`].
///
/// Rejects non-monotonic or invalid timestamps. Fills in 4/4 when the meter
/// is missing, derives downbeats from the meter when none are given, drops
/// downbeats that sit on no beat, and estimates tempo from beat spacing when
/// the tracker gave none.
pub fn build_beat_grid(raw: RawBeats) -> Result<BeatGrid, BeatGridError> {
    check_series("beats", &raw.beats)?;
    check_series("downbeats", &raw.downbeats)?;

    let time_signature = match raw.time_signature {
        Some(ts) if ts.numerator >= 1 && ts.denominator.is_power_of_two() => ts,
        Some(ts) => {
            log::warn!(
                "Ignoring invalid time signature {}/{}, using 4/4",
                ts.numerator,
                ts.denominator
            );
            TimeSignature::default()
        }
        None => TimeSignature::default(),
    };

    let downbeats = if raw.downbeats.is_empty() {
        raw.beats
            .iter()
            .step_by(time_signature.numerator as usize)
            .copied()
            .collect()
    } else {
        let (kept, dropped): (Vec<f64>, Vec<f64>) = raw
            .downbeats
            .iter()
            .copied()
            .partition(|d| near_any(&raw.beats, *d));
        if !dropped.is_empty() {
            log::warn!("Dropped {} downbeats that fall on no beat", dropped.len());
        }
        kept
    };

    let tempo = match raw.tempo {
        Some(t) if t.is_finite() && t > 0.0 => t,
        _ => tempo_from_beats(&raw.beats).unwrap_or(DEFAULT_TEMPO),
    };

    Ok(BeatGrid {
        tempo: (tempo * 10.0).round() / 10.0,
        time_signature,
        beats: raw.beats,
        downbeats,
    })
}

/// Times must be finite, non-negative and strictly increasing.
pub(crate) fn check_series(series: &'static str, times: &[f64]) -> Result<(), BeatGridError> {
    for (index, t) in times.iter().enumerate() {
        if !t.is_finite() || *t < 0.0 {
            return Err(BeatGridError::InvalidTime { series, index });
        }
    }
    for (index, pair) in times.windows(2).enumerate() {
        if pair[1] <= pair[0] {
            return Err(BeatGridError::NotMonotonic {
                series,
                index: index + 1,
            });
        }
    }
    Ok(())
}

/// Median inter-beat interval converted to BPM.
fn tempo_from_beats(beats: &[f64]) -> Option<f64> {
    let mut intervals: Vec<f64> = beats.windows(2).map(|w| w[1] - w[0]).collect();
    if intervals.is_empty() {
        return None;
    }
    intervals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = intervals.len() / 2;
    let median = if intervals.len() % 2 == 0 {
        (intervals[mid - 1] + intervals[mid]) / 2.0
    } else {
        intervals[mid]
    };
    Some(60.0 / median)
}

/// Whether any sorted `times` entry lies within the downbeat tolerance of `t`.
fn near_any(times: &[f64], t: f64) -> bool {
    let idx = times.partition_point(|x| *x < t);
    let after = times.get(idx).is_some_and(|x| x - t <= DOWNBEAT_TOLERANCE_SECS);
    let before = idx > 0 && t - times[idx - 1] <= DOWNBEAT_TOLERANCE_SECS;
    after || before
}

impl BeatGrid {
    /// 1-based bar number of the downbeat at `downbeat_index`.
    pub fn bar_number(&self, downbeat_index: usize) -> Option<usize> {
        (downbeat_index < self.downbeats.len()).then_some(downbeat_index + 1)
    }

    /// Bar number containing `t`, or `None` before the first downbeat.
    pub fn bar_at(&self, t: f64) -> Option<usize> {
        match self.downbeats.partition_point(|d| *d <= t) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn is_downbeat(&self, beat: f64) -> bool {
        near_any(&self.downbeats, beat)
    }

    /// Bars spanned by consecutive downbeats. The last bar is closed by the
    /// final beat when it lies past the last downbeat, else by `track_end`.
    pub fn bars(&self, track_end: f64) -> Vec<Bar> {
        let Some(&last_downbeat) = self.downbeats.last() else {
            return Vec::new();
        };
        let tail_end = match self.beats.last() {
            Some(&b) if b > last_downbeat => b,
            _ => track_end.max(last_downbeat),
        };

        self.downbeats
            .iter()
            .enumerate()
            .map(|(i, &start)| Bar {
                number: i + 1,
                start,
                end: self.downbeats.get(i + 1).copied().unwrap_or(tail_end),
            })
            .collect()
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.time_signature.numerator
    }
}
