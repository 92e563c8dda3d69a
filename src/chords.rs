use std::sync::LazyLock;

use regex::Regex;

use crate::merge::coalesce_equal_neighbours;
use crate::model::{ChordSegment, Mode, is_no_chord};

/// Pitch-class names, sharp spelling only.
pub const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Flat spellings of the black keys.
const FLAT_ALIASES: [(&str, usize); 5] = [("Db", 1), ("Eb", 3), ("Gb", 6), ("Ab", 8), ("Bb", 10)];

/// White-key names reached by an accidental.
const ENHARMONIC_SWAPS: [(&str, usize); 4] = [("E#", 5), ("B#", 0), ("Cb", 11), ("Fb", 4)];

/// Root letter plus accidentals, then everything else.
static CHORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<root>[A-G][#b♯♭]?)(?P<rest>.*)$").unwrap());

/// How a note name was mapped to a pitch class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootResolution {
    Exact(usize),
    Alias(usize),
    Enharmonic(usize),
    Unresolved,
}

impl RootResolution {
    pub fn pitch_class(self) -> Option<usize> {
        match self {
            Self::Exact(pc) | Self::Alias(pc) | Self::Enharmonic(pc) => Some(pc),
            Self::Unresolved => None,
        }
    }
}

/// Resolve a note name to a pitch class.
///
/// Tried in order: exact sharp name, flat alias, enharmonic swap. Anything
/// else is `Unresolved`; there is no further guessing.
pub fn resolve_root(token: &str) -> RootResolution {
    let token = token.replace('♯', "#").replace('♭', "b");
    if let Some(pc) = PITCH_CLASSES.iter().position(|n| *n == token) {
        return RootResolution::Exact(pc);
    }
    if let Some((_, pc)) = FLAT_ALIASES.iter().find(|(n, _)| *n == token) {
        return RootResolution::Alias(*pc);
    }
    if let Some((_, pc)) = ENHARMONIC_SWAPS.iter().find(|(n, _)| *n == token) {
        return RootResolution::Enharmonic(*pc);
    }
    RootResolution::Unresolved
}

/// A chord label split into its parts. Only labels with a resolvable root parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordName {
    pub root: usize,
    pub quality: String,
    pub bass: Option<usize>,
}

impl ChordName {
    pub fn parse(label: &str) -> Option<Self> {
        if is_no_chord(label) {
            return None;
        }
        let caps = CHORD_RE.captures(label)?;
        let root = resolve_root(&caps["root"]).pitch_class()?;
        let rest = &caps["rest"];

        // A trailing "/X" is a bass note only when X is itself a note name.
        let (quality, bass) = match rest.rsplit_once('/') {
            Some((q, b)) => match resolve_root(b).pitch_class() {
                Some(pc) => (q, Some(pc)),
                None => (rest, None),
            },
            None => (rest, None),
        };

        Some(Self {
            root,
            quality: quality.to_string(),
            bass,
        })
    }

    pub fn transposed(&self, semitones: i32) -> Self {
        Self {
            root: shift(self.root, semitones),
            quality: self.quality.clone(),
            bass: self.bass.map(|b| shift(b, semitones)),
        }
    }

    /// Reduce to a plain major or minor triad.
    pub fn simplified(&self) -> Self {
        Self {
            root: self.root,
            quality: simplify_quality(&self.quality).to_string(),
            bass: None,
        }
    }
}

impl std::fmt::Display for ChordName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", PITCH_CLASSES[self.root], self.quality)?;
        if let Some(bass) = self.bass {
            write!(f, "/{}", PITCH_CLASSES[bass])?;
        }
        Ok(())
    }
}

/// Reduces `semitones` first so extreme values cannot overflow.
fn shift(pc: usize, semitones: i32) -> usize {
    (pc as i32 + semitones.rem_euclid(12)).rem_euclid(12) as usize
}

/// Minor if the quality has an `m` that does not start `maj`; major otherwise.
fn simplify_quality(quality: &str) -> &'static str {
    let minor = quality
        .match_indices('m')
        .any(|(i, _)| !quality[i + 1..].starts_with("aj"));
    if minor { "m" } else { "" }
}

/// Respell a label with sharp roots. Unresolvable labels are returned as-is.
pub fn canonical_label(label: &str) -> String {
    match ChordName::parse(label) {
        Some(name) => name.to_string(),
        None => label.to_string(),
    }
}

/// Shift a label's root (and slash bass) by `semitones`, normalized mod 12.
pub fn transpose_label(label: &str, semitones: i32) -> String {
    match ChordName::parse(label) {
        Some(name) => name.transposed(semitones).to_string(),
        None => label.to_string(),
    }
}

/// Reduce a label to its major/minor triad.
pub fn simplify_label(label: &str) -> String {
    match ChordName::parse(label) {
        Some(name) => name.simplified().to_string(),
        None => label.to_string(),
    }
}

/// Render one label under a transpose and mode.
pub fn render_label(label: &str, semitones: i32, mode: Mode) -> String {
    match ChordName::parse(label) {
        Some(name) => {
            let name = name.transposed(semitones);
            match mode {
                Mode::Full => name.to_string(),
                Mode::Simple => name.simplified().to_string(),
            }
        }
        None => label.to_string(),
    }
}

/// Build the per-request view of raw segments. The input is never modified;
/// neighbours that end up with the same label are joined.
pub fn transform(segments: &[ChordSegment], semitones: i32, mode: Mode) -> Vec<ChordSegment> {
    relabel(segments, |label| render_label(label, semitones, mode))
}

pub fn transpose_segments(segments: &[ChordSegment], semitones: i32) -> Vec<ChordSegment> {
    relabel(segments, |label| transpose_label(label, semitones))
}

pub fn simplify_segments(segments: &[ChordSegment]) -> Vec<ChordSegment> {
    relabel(segments, simplify_label)
}

/// Canonicalize labels to sharp spelling; applied once before storing.
pub fn canonical_segments(segments: &[ChordSegment]) -> Vec<ChordSegment> {
    relabel(segments, canonical_label)
}

fn relabel(segments: &[ChordSegment], f: impl Fn(&str) -> String) -> Vec<ChordSegment> {
    let mut out: Vec<ChordSegment> = segments
        .iter()
        .map(|s| ChordSegment::new(s.start, s.end, f(&s.label)))
        .collect();
    coalesce_equal_neighbours(&mut out);
    out
}
