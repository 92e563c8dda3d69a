pub mod vamp;

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::beats::{RawBeats, build_beat_grid};
use crate::chords::canonical_segments;
use crate::merge::merge_frames;
use crate::model::{ChordFrame, RawAnalysis};

/// Failure of the expensive detection step. Cloned to every caller waiting
/// on the same track.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("Detection failed: {0}")]
    Failure(String),
    #[error("Detection timed out after {0:?}")]
    Timeout(Duration),
}

/// Frame classifier output for one decoded track.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOutput {
    pub frames: Vec<ChordFrame>,
    pub duration: f64,
}

/// External chord frame classifier.
pub trait ChordDetector: Send + Sync {
    fn detect(&self, track_id: &str) -> Result<DetectorOutput, DetectionError>;
}

/// External tempo/beat tracker.
pub trait BeatTracker: Send + Sync {
    fn track(&self, track_id: &str) -> Result<RawBeats, DetectionError>;
}

/// Run both collaborators for a track and build its raw analysis:
/// detect -> merge frames -> canonical spelling -> beat grid -> validated record.
pub fn analyze_track(
    detector: &dyn ChordDetector,
    tracker: &dyn BeatTracker,
    track_id: &str,
) -> Result<RawAnalysis, DetectionError> {
    let started = Instant::now();
    log::debug!("Detecting chords and beats for {track_id}");

    let output = detector.detect(track_id)?;
    let raw_beats = tracker.track(track_id)?;

    let segments = canonical_segments(&merge_frames(&output.frames, output.duration));
    let beat_grid = build_beat_grid(raw_beats)
        .map_err(|e| DetectionError::Failure(format!("beat tracker output rejected: {e}")))?;

    let analysis = RawAnalysis::new(track_id, segments, beat_grid, output.duration)
        .map_err(|e| DetectionError::Failure(format!("invalid analysis for {track_id}: {e}")))?;

    log::info!(
        "Analyzed {track_id}: {} frames -> {} segments, {} beats in {:.1}s",
        output.frames.len(),
        analysis.segments().len(),
        analysis.beat_grid().beats.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDetector(DetectorOutput);

    impl ChordDetector for FixedDetector {
        fn detect(&self, _track_id: &str) -> Result<DetectorOutput, DetectionError> {
            Ok(self.0.clone())
        }
    }

    struct FixedBeats(RawBeats);

    impl BeatTracker for FixedBeats {
        fn track(&self, _track_id: &str) -> Result<RawBeats, DetectionError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl ChordDetector for Broken {
        fn detect(&self, _track_id: &str) -> Result<DetectorOutput, DetectionError> {
            Err(DetectionError::Failure("classifier crashed".into()))
        }
    }

    fn beats() -> RawBeats {
        RawBeats {
            tempo: Some(120.0),
            time_signature: None,
            beats: vec![0.0, 0.5, 1.0, 1.5],
            downbeats: vec![0.0],
        }
    }

    #[test]
    fn test_analyze_track_merges_and_canonicalizes() {
        let detector = FixedDetector(DetectorOutput {
            frames: vec![
                ChordFrame::new(0.0, "Bb"),
                ChordFrame::new(1.0, "Eb7"),
                ChordFrame::new(1.05, "F"),
                ChordFrame::new(1.5, "F"),
            ],
            duration: 2.0,
        });
        let analysis = analyze_track(&detector, &FixedBeats(beats()), "t1").unwrap();
        let labels: Vec<&str> = analysis.segments().iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["A#", "F"]);
        assert_eq!(analysis.duration(), 2.0);
        assert_eq!(analysis.track_id, "t1");
    }

    #[test]
    fn test_analyze_track_propagates_detector_failure() {
        let err = analyze_track(&Broken, &FixedBeats(beats()), "t1").unwrap_err();
        assert_eq!(err, DetectionError::Failure("classifier crashed".into()));
    }

    #[test]
    fn test_analyze_track_rejects_bad_beats() {
        let detector = FixedDetector(DetectorOutput {
            frames: vec![ChordFrame::new(0.0, "C")],
            duration: 1.0,
        });
        let bad = RawBeats {
            beats: vec![1.0, 0.5],
            ..Default::default()
        };
        let err = analyze_track(&detector, &FixedBeats(bad), "t1").unwrap_err();
        assert!(matches!(err, DetectionError::Failure(msg) if msg.contains("beat tracker")));
    }

    #[test]
    fn test_analyze_track_rejects_zero_duration() {
        let detector = FixedDetector(DetectorOutput {
            frames: vec![ChordFrame::new(0.0, "C")],
            duration: 0.0,
        });
        let err = analyze_track(&detector, &FixedBeats(beats()), "t1").unwrap_err();
        assert!(matches!(err, DetectionError::Failure(_)));
    }
}
