use std::path::{Path, PathBuf};
use std::process::Command;

use crate::beats::RawBeats;
use crate::model::{ChordFrame, TimeSignature};

use super::{BeatTracker, ChordDetector, DetectionError, DetectorOutput};

const CHORDINO_TRANSFORM: &str = "vamp:nnls-chroma:chordino:simplechord";
const BAR_BEAT_TRANSFORM: &str = "vamp:qm-vamp-plugins:qm-barbeattracker:beats";

/// Locations of the command-line tools and decoded audio the adapters use.
/// Audio for a track is expected at `<audio_dir>/<track_id>.wav`.
#[derive(Debug, Clone)]
pub struct VampTools {
    pub sonic_annotator: String,
    pub ffprobe: String,
    pub audio_dir: PathBuf,
}

impl VampTools {
    fn audio_path(&self, track_id: &str) -> Result<PathBuf, DetectionError> {
        let path = self.audio_dir.join(format!("{track_id}.wav"));
        if path.is_file() {
            Ok(path)
        } else {
            Err(DetectionError::Failure(format!(
                "no decoded audio for {track_id} at {}",
                path.display()
            )))
        }
    }

    /// Run one vamp transform and return its CSV output.
    fn annotate(&self, transform: &str, wav: &Path) -> Result<String, DetectionError> {
        run_tool(
            &self.sonic_annotator,
            &[
                "-d",
                transform,
                "-w",
                "csv",
                "--csv-stdout",
                &wav.to_string_lossy(),
            ],
        )
    }

    /// Track length in seconds, from the container header.
    fn duration(&self, wav: &Path) -> Result<f64, DetectionError> {
        let out = run_tool(
            &self.ffprobe,
            &[
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                &wav.to_string_lossy(),
            ],
        )?;
        out.trim()
            .parse::<f64>()
            .map_err(|_| DetectionError::Failure(format!("ffprobe gave no duration: {out:?}")))
    }
}

/// Run a tool to completion and capture stdout.
fn run_tool(program: &str, args: &[&str]) -> Result<String, DetectionError> {
    let output = Command::new(program).args(args).output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DetectionError::Failure(format!("{program} not found"))
        } else {
            DetectionError::Failure(format!("failed to start {program}: {e}"))
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DetectionError::Failure(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse sonic-annotator CSV into `(time, label)` rows.
///
/// Rows look like `"file.wav",12.3,"Am"` (first row) or `,12.3,"Am"`; some
/// outputs add a duration column before the label. Unparsable rows are skipped.
fn parse_csv_rows(text: &str) -> Vec<(f64, String)> {
    text.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line
                .split(',')
                .map(|c| c.trim().trim_matches('"'))
                .collect();
            let time_idx = cols.iter().position(|c| c.parse::<f64>().is_ok())?;
            if cols.len() <= time_idx + 1 {
                return None;
            }
            let time = cols[time_idx].parse::<f64>().ok()?;
            let label = cols.last()?;
            Some((time, label.to_string()))
        })
        .collect()
}

/// Chordino via sonic-annotator. Emits one frame per chord change.
pub struct ChordinoDetector {
    tools: VampTools,
}

impl ChordinoDetector {
    pub fn new(tools: VampTools) -> Self {
        Self { tools }
    }
}

impl ChordDetector for ChordinoDetector {
    fn detect(&self, track_id: &str) -> Result<DetectorOutput, DetectionError> {
        let wav = self.tools.audio_path(track_id)?;
        let csv = self.tools.annotate(CHORDINO_TRANSFORM, &wav)?;
        let frames = chord_frames(&csv);
        let duration = self.tools.duration(&wav)?;
        log::debug!("Chordino: {} chord changes for {track_id}", frames.len());
        Ok(DetectorOutput { frames, duration })
    }
}

fn chord_frames(csv: &str) -> Vec<ChordFrame> {
    parse_csv_rows(csv)
        .into_iter()
        .map(|(t, label)| ChordFrame::new(t, label))
        .collect()
}

/// QM bar-and-beat tracker via sonic-annotator. Labels are the beat's
/// position in its bar, so `"1"` marks a downbeat.
pub struct BarBeatTracker {
    tools: VampTools,
}

impl BarBeatTracker {
    pub fn new(tools: VampTools) -> Self {
        Self { tools }
    }
}

impl BeatTracker for BarBeatTracker {
    fn track(&self, track_id: &str) -> Result<RawBeats, DetectionError> {
        let wav = self.tools.audio_path(track_id)?;
        let csv = self.tools.annotate(BAR_BEAT_TRANSFORM, &wav)?;
        Ok(raw_beats(&csv))
    }
}

fn raw_beats(csv: &str) -> RawBeats {
    let rows = parse_csv_rows(csv);
    let positions: Vec<Option<u32>> = rows.iter().map(|(_, l)| l.parse::<u32>().ok()).collect();

    let beats = rows.iter().map(|(t, _)| *t).collect();
    let downbeats = rows
        .iter()
        .zip(&positions)
        .filter(|(_, pos)| **pos == Some(1))
        .map(|((t, _), _)| *t)
        .collect();
    let time_signature = positions
        .iter()
        .flatten()
        .max()
        .filter(|n| **n >= 2)
        .map(|n| TimeSignature {
            numerator: *n,
            denominator: 4,
        });

    RawBeats {
        tempo: None,
        time_signature,
        beats,
        downbeats,
    }
}
