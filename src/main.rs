use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chordsheet::cache::AnalysisCache;
use chordsheet::cache::store::{FsObjectStore, ObjectStore};
use chordsheet::config::AppConfig;
use chordsheet::detect::vamp::{BarBeatTracker, ChordinoDetector, VampTools};
use chordsheet::lyrics::lrclib::{LrclibClient, LyricsLookup, LyricsProvider};
use chordsheet::model::Mode;
use chordsheet::pipeline::{SheetRequest, SheetService};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(name = "chordsheet", version, about = "Transposable, lyric-aligned chord sheets from detector output")]
struct Cli {
    /// Path to the local cache database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Directory backing the remote cache tier
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Simple,
    Full,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Simple => Mode::Simple,
            ModeArg::Full => Mode::Full,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build a chord sheet for a track (detects on first use) and print it as JSON
    Sheet {
        track_id: String,

        /// Semitones to transpose by (may be negative)
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        transpose: i32,

        #[arg(short, long, value_enum, default_value = "simple")]
        mode: ModeArg,

        /// LRC lyrics file to use for this sheet only
        #[arg(long)]
        lrc: Option<PathBuf>,

        /// Plain lyrics file to use for this sheet only
        #[arg(long)]
        lyrics: Option<PathBuf>,

        /// Song title for a lyrics lookup when nothing is cached
        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        artist: Option<String>,
    },

    /// Detect and cache analyses ahead of time
    Warm {
        #[arg(required = true)]
        track_ids: Vec<String>,
    },

    /// Store lyrics with a cached analysis
    AttachLyrics {
        track_id: String,

        #[arg(long)]
        lrc: Option<PathBuf>,

        #[arg(long)]
        lyrics: Option<PathBuf>,

        /// Remove both kinds of stored lyrics
        #[arg(long, conflicts_with_all = ["lrc", "lyrics"])]
        clear: bool,
    },

    /// Print the cached raw analysis for a track
    Show { track_id: String },

    /// Look up lyrics without touching the cache
    Lyrics {
        #[arg(long)]
        title: String,

        #[arg(long)]
        artist: Option<String>,
    },

    /// Show cache statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = AppConfig::load();

    // CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(chordsheet::config::default_db_path);
    log::info!("Database: {}", db_path.display());
    let db = chordsheet::db::Database::open(&db_path).context("Failed to open database")?;

    let remote: Option<Arc<dyn ObjectStore>> = cli
        .store_dir
        .or(config.store_dir.clone())
        .map(|dir| {
            log::info!("Remote store: {}", dir.display());
            Arc::new(FsObjectStore::new(dir)) as Arc<dyn ObjectStore>
        });
    let cache = Arc::new(AnalysisCache::new(db, remote, config.detection_timeout()));

    match cli.command {
        Commands::Sheet {
            track_id,
            transpose,
            mode,
            lrc,
            lyrics,
            title,
            artist,
        } => {
            let service = build_service(&config, cache);
            let request = SheetRequest {
                track_id,
                transpose,
                mode: mode.into(),
                plain_lyrics: read_optional(lyrics.as_deref())?,
                lrc_lyrics: read_optional(lrc.as_deref())?,
                title,
                artist,
            };
            let sheet = service
                .sheet(&request)
                .await
                .with_context(|| format!("Failed to build sheet for {}", request.track_id))?;
            println!("{}", serde_json::to_string_pretty(&sheet)?);
        }

        Commands::Warm { track_ids } => {
            let service = build_service(&config, cache);
            let pb = ProgressBar::new(track_ids.len() as u64);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .unwrap()
                .progress_chars("=>-"),
            );

            let (mut analyzed, mut already, mut failed) = (0usize, 0usize, 0usize);
            for id in &track_ids {
                pb.set_message(id.clone());
                match service.analysis(id).await {
                    Ok(lookup) if lookup.cached => already += 1,
                    Ok(_) => analyzed += 1,
                    Err(e) => {
                        pb.println(format!("  {id}: {e}"));
                        failed += 1;
                    }
                }
                pb.inc(1);
            }
            pb.finish_and_clear();
            println!(
                "Warm complete: {analyzed} analyzed, {already} already cached, {failed} failed"
            );
        }

        Commands::AttachLyrics {
            track_id,
            lrc,
            lyrics,
            clear,
        } => {
            let (plain, lrc) = if clear {
                (Some(String::new()), Some(String::new()))
            } else {
                (read_optional(lyrics.as_deref())?, read_optional(lrc.as_deref())?)
            };
            if plain.is_none() && lrc.is_none() {
                anyhow::bail!("Nothing to attach: pass --lrc, --lyrics or --clear");
            }
            let raw = cache
                .attach_lyrics(&track_id, plain.as_deref(), lrc.as_deref())
                .with_context(|| format!("Failed to attach lyrics to {track_id}"))?;
            println!(
                "Lyrics for {}: plain {}, lrc {}",
                raw.track_id,
                if raw.plain_lyrics.is_some() { "stored" } else { "none" },
                if raw.lrc_lyrics.is_some() { "stored" } else { "none" },
            );
        }

        Commands::Show { track_id } => {
            let raw = cache
                .get(&track_id)
                .context("Cache lookup failed")?
                .with_context(|| format!("No cached analysis for {track_id}"))?;
            println!("{}", serde_json::to_string_pretty(&raw)?);
        }

        Commands::Lyrics { title, artist } => {
            let client = lrclib_client(&config);
            match client
                .search(&title, artist.as_deref())
                .context("Lyrics lookup failed")?
            {
                LyricsLookup::Found(record) => {
                    println!("{} - {}", record.artist_name, record.track_name);
                    if let Some(album) = &record.album_name {
                        println!("Album: {album}");
                    }
                    println!();
                    match (&record.lrc_lyrics, &record.plain_lyrics) {
                        (Some(lrc), _) => println!("{lrc}"),
                        (None, Some(plain)) => println!("{plain}"),
                        (None, None) => println!("(no lyric text)"),
                    }
                }
                LyricsLookup::NotFound => println!("No lyrics found for {title:?}"),
            }
        }

        Commands::Stats => {
            let stats = cache.stats().context("Failed to read cache stats")?;
            println!("Cached analyses:   {}", stats.analyses);
            println!("  with plain text: {}", stats.with_plain_lyrics);
            println!("  with LRC:        {}", stats.with_lrc_lyrics);
            if let Some(newest) = &stats.newest {
                println!("Newest analysis:   {newest}");
            }
            println!(
                "Remote tier:       {}",
                if cache.has_remote() { "enabled" } else { "disabled" }
            );
        }
    }

    Ok(())
}

fn build_service(config: &AppConfig, cache: Arc<AnalysisCache>) -> SheetService {
    let tools = VampTools {
        sonic_annotator: config.tools.sonic_annotator.clone(),
        ffprobe: config.tools.ffprobe.clone(),
        audio_dir: config.audio_dir.clone(),
    };
    let service = SheetService::new(
        cache,
        Arc::new(ChordinoDetector::new(tools.clone())),
        Arc::new(BarBeatTracker::new(tools)),
    );
    if config.lyrics.enabled {
        service.with_lyrics_provider(Arc::new(lrclib_client(config)))
    } else {
        service
    }
}

fn lrclib_client(config: &AppConfig) -> LrclibClient {
    LrclibClient::new(
        &config.lyrics.base_url,
        &config.lyrics.user_agent,
        Duration::from_secs(config.lyrics.timeout_secs),
    )
}

fn read_optional(path: Option<&Path>) -> Result<Option<String>> {
    path.map(|p| {
        std::fs::read_to_string(p).with_context(|| format!("Failed to read {}", p.display()))
    })
    .transpose()
}
