use crate::model::{ChordFrame, ChordSegment, NO_CHORD};

/// Segments shorter than this (seconds) are absorbed into a neighbour.
pub const MIN_SEGMENT_SECS: f64 = 0.15;

/// Turn an ordered frame stream into clean, contiguous chord segments.
///
/// 1. Consecutive frames with the same label become one provisional segment,
///    ending where the next label starts; the last one ends at `duration`.
/// 2. The earliest segment shorter than [`MIN_SEGMENT_SECS`] is folded into
///    the previous segment (or the next one if it is first), then equal
///    neighbours are re-joined. This repeats until nothing short remains or a
///    single segment is left.
///
/// The result covers `[0, duration)` exactly. Empty input yields a single
/// `"N"` segment; a non-positive duration yields nothing.
pub fn merge_frames(frames: &[ChordFrame], duration: f64) -> Vec<ChordSegment> {
    if !duration.is_finite() || duration <= 0.0 {
        return Vec::new();
    }

    let mut segments = provisional_segments(frames, duration);
    if segments.is_empty() {
        return vec![ChordSegment::new(0.0, duration, NO_CHORD)];
    }

    absorb_short_segments(&mut segments);
    segments
}

/// Run the merge again over an existing segment list.
/// Output of [`merge_frames`] is a fixed point of this function.
pub fn merge_segments(segments: &[ChordSegment], duration: f64) -> Vec<ChordSegment> {
    let frames: Vec<ChordFrame> = segments
        .iter()
        .map(|s| ChordFrame::new(s.start, s.label.clone()))
        .collect();
    merge_frames(&frames, duration)
}

/// Step 1: group runs of identical labels.
fn provisional_segments(frames: &[ChordFrame], duration: f64) -> Vec<ChordSegment> {
    let mut segments: Vec<ChordSegment> = Vec::new();

    for frame in frames {
        if !frame.timestamp.is_finite() || frame.timestamp >= duration {
            continue;
        }
        match segments.last_mut() {
            Some(open) if open.label == frame.label => {}
            Some(open) => {
                // Out-of-order timestamps would produce a reversed span; keep the
                // boundary monotonic and let the short-segment pass clean up.
                let boundary = frame.timestamp.max(open.start);
                open.end = boundary;
                segments.push(ChordSegment::new(boundary, duration, frame.label.clone()));
            }
            None => segments.push(ChordSegment::new(0.0, duration, frame.label.clone())),
        }
    }

    if let Some(last) = segments.last_mut() {
        last.end = duration;
    }
    segments
}

/// Steps 2 and 3, iterated to a fixed point.
fn absorb_short_segments(segments: &mut Vec<ChordSegment>) {
    while segments.len() > 1 {
        let Some(idx) = segments
            .iter()
            .position(|s| s.duration() < MIN_SEGMENT_SECS)
        else {
            break;
        };

        let short = segments.remove(idx);
        if idx > 0 {
            segments[idx - 1].end = short.end;
        } else {
            segments[0].start = short.start;
        }

        coalesce_equal_neighbours(segments);
    }
}

/// Join adjacent segments that carry the same label.
pub(crate) fn coalesce_equal_neighbours(segments: &mut Vec<ChordSegment>) {
    segments.dedup_by(|next, prev| {
        if next.label == prev.label {
            prev.end = next.end;
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::check_coverage;

    fn frames(points: &[(f64, &str)]) -> Vec<ChordFrame> {
        points.iter().map(|(t, l)| ChordFrame::new(*t, *l)).collect()
    }

    fn labels(segments: &[ChordSegment]) -> Vec<&str> {
        segments.iter().map(|s| s.label.as_str()).collect()
    }

    #[test]
    fn test_short_blip_is_absorbed() {
        let input = frames(&[(0.0, "C"), (0.1, "C"), (0.2, "G"), (0.25, "C")]);
        let merged = merge_frames(&input, 1.0);
        assert_eq!(merged, vec![ChordSegment::new(0.0, 1.0, "C")]);
    }

    #[test]
    fn test_runs_become_segments() {
        let input = frames(&[
            (0.0, "C"),
            (0.5, "C"),
            (1.0, "G"),
            (1.5, "G"),
            (2.0, "Am"),
        ]);
        let merged = merge_frames(&input, 3.0);
        assert_eq!(
            merged,
            vec![
                ChordSegment::new(0.0, 1.0, "C"),
                ChordSegment::new(1.0, 2.0, "G"),
                ChordSegment::new(2.0, 3.0, "Am"),
            ]
        );
    }

    #[test]
    fn test_short_between_different_neighbours_goes_to_previous() {
        let input = frames(&[(0.0, "C"), (1.0, "D"), (1.1, "G")]);
        let merged = merge_frames(&input, 2.0);
        assert_eq!(
            merged,
            vec![
                ChordSegment::new(0.0, 1.1, "C"),
                ChordSegment::new(1.1, 2.0, "G"),
            ]
        );
    }

    #[test]
    fn test_short_first_segment_goes_to_next() {
        let input = frames(&[(0.0, "N"), (0.05, "Em"), (1.0, "C")]);
        let merged = merge_frames(&input, 2.0);
        assert_eq!(
            merged,
            vec![
                ChordSegment::new(0.0, 1.0, "Em"),
                ChordSegment::new(1.0, 2.0, "C"),
            ]
        );
    }

    #[test]
    fn test_short_last_segment_goes_to_previous() {
        let input = frames(&[(0.0, "C"), (1.9, "G")]);
        let merged = merge_frames(&input, 2.0);
        assert_eq!(merged, vec![ChordSegment::new(0.0, 2.0, "C")]);
    }

    #[test]
    fn test_single_short_segment_is_kept() {
        let merged = merge_frames(&frames(&[(0.0, "A")]), 0.1);
        assert_eq!(merged, vec![ChordSegment::new(0.0, 0.1, "A")]);
    }

    #[test]
    fn test_cascading_absorption_reaches_fixed_point() {
        // Each blip is short; absorbing one makes C reach the next C.
        let input = frames(&[
            (0.0, "C"),
            (1.0, "D"),
            (1.05, "C"),
            (1.1, "E"),
            (1.2, "C"),
            (2.0, "F"),
        ]);
        let merged = merge_frames(&input, 3.0);
        assert_eq!(labels(&merged), vec!["C", "F"]);
        assert!(check_coverage(&merged, 3.0).is_ok());
    }

    #[test]
    fn test_empty_frames_yield_no_chord() {
        let merged = merge_frames(&[], 4.0);
        assert_eq!(merged, vec![ChordSegment::new(0.0, 4.0, "N")]);
    }

    #[test]
    fn test_non_positive_duration_yields_nothing() {
        assert!(merge_frames(&frames(&[(0.0, "C")]), 0.0).is_empty());
        assert!(merge_frames(&[], -1.0).is_empty());
    }

    #[test]
    fn test_first_frame_after_zero_is_clamped() {
        let merged = merge_frames(&frames(&[(0.4, "C"), (1.0, "G")]), 2.0);
        assert_eq!(merged[0].start, 0.0);
        assert!(check_coverage(&merged, 2.0).is_ok());
    }

    #[test]
    fn test_frames_past_duration_are_ignored() {
        let merged = merge_frames(&frames(&[(0.0, "C"), (1.0, "G"), (5.0, "D")]), 2.0);
        assert_eq!(labels(&merged), vec!["C", "G"]);
        assert_eq!(merged[1].end, 2.0);
    }

    #[test]
    fn test_out_of_order_frames_keep_coverage() {
        let merged = merge_frames(&frames(&[(0.0, "C"), (1.0, "G"), (0.5, "D"), (1.5, "E")]), 3.0);
        assert!(check_coverage(&merged, 3.0).is_ok());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let inputs = [
            frames(&[(0.0, "C"), (0.1, "C"), (0.2, "G"), (0.25, "C")]),
            frames(&[(0.0, "N"), (0.05, "Em"), (1.0, "C"), (1.1, "D"), (1.3, "D"), (2.2, "G")]),
            frames(&[(0.0, "C"), (1.0, "D"), (1.05, "C"), (1.1, "E"), (1.2, "C"), (2.0, "F")]),
            Vec::new(),
        ];
        for input in &inputs {
            let once = merge_frames(input, 3.0);
            let twice = merge_segments(&once, 3.0);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_merge_is_deterministic() {
        let input = frames(&[(0.0, "C"), (0.3, "G"), (0.35, "Am"), (0.9, "F")]);
        assert_eq!(merge_frames(&input, 2.0), merge_frames(&input, 2.0));
    }

    #[test]
    fn test_fixed_hop_stream() {
        // 50ms hop, mostly C with a 100ms G flicker and a real change to F.
        let mut input = Vec::new();
        for i in 0..40 {
            let t = i as f64 / 20.0;
            let label = match i {
                10 | 11 => "G",
                20.. => "F",
                _ => "C",
            };
            input.push(ChordFrame::new(t, label));
        }
        let merged = merge_frames(&input, 2.0);
        assert_eq!(
            merged,
            vec![
                ChordSegment::new(0.0, 1.0, "C"),
                ChordSegment::new(1.0, 2.0, "F"),
            ]
        );
    }
}
