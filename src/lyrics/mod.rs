pub mod lrclib;

use std::sync::LazyLock;

use regex::Regex;

use crate::model::{AlignedLine, ChordSegment, LyricLine, NO_CHORD, PlainSheet};

/// One leading `[mm:ss]` or `[mm:ss.xx]` stamp.
static LRC_STAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(?P<min>\d+):(?P<sec>\d+(?:\.\d+)?)\]").unwrap());

/// Parse LRC text into timestamped lines, in input order.
///
/// Lines without a leading time stamp (ID tags like `[ar:...]`, blank lines,
/// garbage) are skipped. A line with several stamps yields one entry per stamp.
pub fn parse_lrc(text: &str) -> Vec<LyricLine> {
    let mut lines = Vec::new();
    let mut skipped = 0usize;

    for raw in text.lines() {
        let mut rest = raw.trim();
        let mut stamps = Vec::new();
        while let Some(caps) = LRC_STAMP_RE.captures(rest) {
            let (Ok(min), Ok(sec)) = (caps["min"].parse::<u32>(), caps["sec"].parse::<f64>()) else {
                break;
            };
            stamps.push(f64::from(min) * 60.0 + sec);
            rest = &rest[caps[0].len()..];
        }

        if stamps.is_empty() {
            if !raw.trim().is_empty() {
                skipped += 1;
            }
            continue;
        }

        let text = rest.trim();
        lines.extend(stamps.into_iter().map(|t| LyricLine {
            timestamp: Some(t),
            text: text.to_string(),
        }));
    }

    if skipped > 0 {
        log::debug!("Skipped {skipped} LRC lines without a time stamp");
    }
    lines
}

/// Split plain lyrics into untimed lines, dropping leading and trailing blank lines.
pub fn parse_plain(text: &str) -> Vec<LyricLine> {
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    match (first, last) {
        (Some(a), Some(b)) => lines[a..=b]
            .iter()
            .map(|l| LyricLine {
                timestamp: None,
                text: l.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Chord sounding at `t`: the segment containing it, else the next segment
/// to start, else `"N"`. `segments` must be time-sorted.
pub fn chord_at(segments: &[ChordSegment], t: f64) -> &str {
    let idx = segments.partition_point(|s| s.end <= t);
    segments.get(idx).map_or(NO_CHORD, |s| s.label.as_str())
}

/// Bind each timed lyric line to a chord. Lines keep their input order;
/// untimed lines are ignored.
pub fn align_lines(segments: &[ChordSegment], lines: &[LyricLine]) -> Vec<AlignedLine> {
    lines
        .iter()
        .filter_map(|line| {
            let t = line.timestamp?;
            Some(AlignedLine {
                timestamp: t,
                chord: chord_at(segments, t).to_string(),
                text: line.text.clone(),
            })
        })
        .collect()
}

/// Chord labels in order, without no-chord markers or repeats.
pub fn progression(segments: &[ChordSegment]) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for s in segments.iter().filter(|s| !s.is_no_chord()) {
        if out.last() != Some(&s.label.as_str()) {
            out.push(&s.label);
        }
    }
    out
}

/// Unaligned fallback: the progression and the lyric block as two streams.
pub fn plain_sheet(segments: &[ChordSegment], plain: &str) -> Option<PlainSheet> {
    let lines = parse_plain(plain);
    if lines.is_empty() {
        return None;
    }
    let lyrics_text = lines
        .into_iter()
        .map(|l| l.text)
        .collect::<Vec<_>>()
        .join("\n");
    Some(PlainSheet {
        chords_text: progression(segments).join(" | "),
        lyrics_text,
    })
}

/// Lyric presentation for one sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arrangement {
    pub aligned: Option<Vec<AlignedLine>>,
    pub plain: Option<PlainSheet>,
}

/// Pick the LRC path when it yields timed lines, else the plain fallback.
pub fn arrange(segments: &[ChordSegment], plain: Option<&str>, lrc: Option<&str>) -> Arrangement {
    if let Some(lrc) = lrc {
        let lines = parse_lrc(lrc);
        if !lines.is_empty() {
            return Arrangement {
                aligned: Some(align_lines(segments, &lines)),
                plain: None,
            };
        }
        log::debug!("LRC lyrics had no timed lines, falling back to plain text");
    }

    Arrangement {
        aligned: None,
        plain: plain.and_then(|p| plain_sheet(segments, p)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments() -> Vec<ChordSegment> {
        vec![
            ChordSegment::new(0.0, 2.0, "C"),
            ChordSegment::new(2.0, 5.0, "G"),
        ]
    }

    #[test]
    fn test_parse_lrc_basic() {
        let lines = parse_lrc("[00:01.50] Hello\n[01:02.25]World  \n");
        assert_eq!(
            lines,
            vec![
                LyricLine { timestamp: Some(1.5), text: "Hello".into() },
                LyricLine { timestamp: Some(62.25), text: "World".into() },
            ]
        );
    }

    #[test]
    fn test_parse_lrc_skips_tags_and_garbage() {
        let text = "[ar:Someone]\n[ti:Song]\nnot a lyric\n\n[xx:yy] bad\n[00:03] ok";
        let lines = parse_lrc(text);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].timestamp, Some(3.0));
        assert_eq!(lines[0].text, "ok");
    }

    #[test]
    fn test_parse_lrc_multiple_stamps() {
        let lines = parse_lrc("[00:10.00][00:40.00] Chorus");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].timestamp, Some(10.0));
        assert_eq!(lines[1].timestamp, Some(40.0));
        assert!(lines.iter().all(|l| l.text == "Chorus"));
    }

    #[test]
    fn test_parse_lrc_keeps_input_order() {
        let lines = parse_lrc("[00:20.00] b\n[00:10.00] a");
        assert_eq!(lines[0].text, "b");
        assert_eq!(lines[1].text, "a");
    }

    #[test]
    fn test_parse_lrc_empty_text_line() {
        let lines = parse_lrc("[00:05.00]");
        assert_eq!(lines, vec![LyricLine { timestamp: Some(5.0), text: String::new() }]);
    }

    #[test]
    fn test_alignment_scenario() {
        let segs = segments();
        let lines = vec![
            LyricLine { timestamp: Some(3.0), text: "inside".into() },
            LyricLine { timestamp: Some(10.0), text: "after".into() },
        ];
        let aligned = align_lines(&segs, &lines);
        assert_eq!(aligned[0].chord, "G");
        assert_eq!(aligned[1].chord, "N");
        assert_eq!(aligned[0].timestamp, 3.0);
    }

    #[test]
    fn test_chord_at_boundaries() {
        let segs = segments();
        assert_eq!(chord_at(&segs, 0.0), "C");
        assert_eq!(chord_at(&segs, 2.0), "G");
        assert_eq!(chord_at(&segs, 4.999), "G");
        assert_eq!(chord_at(&segs, 5.0), "N");
    }

    #[test]
    fn test_chord_before_first_segment_uses_next() {
        let segs = vec![ChordSegment::new(1.0, 2.0, "Am")];
        assert_eq!(chord_at(&segs, 0.5), "Am");
        assert_eq!(chord_at(&[], 0.5), "N");
    }

    #[test]
    fn test_align_ignores_untimed_lines() {
        let lines = parse_plain("one\ntwo");
        assert!(align_lines(&segments(), &lines).is_empty());
    }

    #[test]
    fn test_progression_skips_no_chord_and_repeats() {
        let segs = vec![
            ChordSegment::new(0.0, 1.0, "N"),
            ChordSegment::new(1.0, 2.0, "C"),
            ChordSegment::new(2.0, 3.0, "X"),
            ChordSegment::new(3.0, 4.0, "C"),
            ChordSegment::new(4.0, 5.0, "G"),
        ];
        assert_eq!(progression(&segs), vec!["C", "G"]);
    }

    #[test]
    fn test_plain_sheet() {
        let sheet = plain_sheet(&segments(), "\n\nline one\nline two  \n\n").unwrap();
        assert_eq!(sheet.chords_text, "C | G");
        assert_eq!(sheet.lyrics_text, "line one\nline two");
        assert!(plain_sheet(&segments(), "  \n ").is_none());
    }

    #[test]
    fn test_arrange_prefers_lrc() {
        let a = arrange(&segments(), Some("plain"), Some("[00:01.00] hi"));
        assert_eq!(a.aligned.unwrap()[0].chord, "C");
        assert!(a.plain.is_none());
    }

    #[test]
    fn test_arrange_falls_back_to_plain() {
        let a = arrange(&segments(), Some("words"), Some("[ar:nobody]"));
        assert!(a.aligned.is_none());
        assert_eq!(a.plain.unwrap().lyrics_text, "words");

        let none = arrange(&segments(), None, None);
        assert_eq!(none, Arrangement::default());
    }
}
