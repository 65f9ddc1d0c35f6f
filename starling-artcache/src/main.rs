use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use starling_core::{
    ArtPipeline, Config, LoftyPictures, UiThread, WorkerPool,
    starling_state::{ArtVariant, Track, TrackId},
};
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: [&str; 9] = [
    "flac", "mp3", "m4a", "ogg", "opus", "wav", "aiff", "wv", "ape",
];

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file to read; defaults apply if it doesn't exist
    #[arg(long, default_value = Config::FILENAME)]
    config: PathBuf,

    /// Override the cache directory from the config
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Log every cache hit, miss and decode attempt
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract embedded cover art for every audio file under a directory into the cache
    Warm {
        directory: PathBuf,
    },
    /// Print the cache file used for a track
    Path {
        track: PathBuf,
    },
    /// Load a track's art the way the player would and describe the result
    Inspect {
        track: PathBuf,
    },
    /// Show how many covers are cached and how much space they use
    Stats,
    /// Delete every cached cover
    Clear,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "starling=debug"
    } else {
        "starling=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }

    let ui = UiThread::spawn();
    let pipeline = Arc::new(ArtPipeline::new(
        &config,
        Arc::new(LoftyPictures),
        ui.handle(),
    ));

    match args.command {
        Command::Warm { directory } => warm(&config, pipeline, &directory)?,
        Command::Path { track } => {
            println!("{}", pipeline.disk_cache().path_for(&track).display());
        }
        Command::Inspect { track } => inspect(&pipeline, &track),
        Command::Stats => {
            let stats = pipeline.disk_cache().stats();
            println!(
                "{} covers, {} bytes in {}",
                stats.entries,
                stats.total_bytes,
                pipeline.disk_cache().cache_dir().display()
            );
        }
        Command::Clear => {
            let removed = pipeline.disk_cache().clear();
            println!(
                "Removed {removed} covers from {}",
                pipeline.disk_cache().cache_dir().display()
            );
        }
    }

    Ok(())
}

fn warm(config: &Config, pipeline: Arc<ArtPipeline>, directory: &Path) -> anyhow::Result<()> {
    anyhow::ensure!(
        directory.is_dir(),
        "Directory '{}' does not exist",
        directory.display()
    );

    let extensions: HashSet<&str> = AUDIO_EXTENSIONS.into_iter().collect();
    let workers = WorkerPool::new(config.max_concurrent_loads);
    let cached = Arc::new(AtomicUsize::new(0));
    let present = Arc::new(AtomicUsize::new(0));
    let missing = Arc::new(AtomicUsize::new(0));

    for entry in WalkDir::new(directory)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let is_audio = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.contains(ext.to_lowercase().as_str()));
        if !is_audio {
            continue;
        }

        let path = entry.into_path();
        if pipeline.disk_cache().contains(&path) {
            present.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        workers.spawn_blocking({
            let pipeline = pipeline.clone();
            let cached = cached.clone();
            let missing = missing.clone();
            move || match pipeline.extract(&path) {
                Some(_) => {
                    tracing::info!("Cached cover art for {}", path.display());
                    cached.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    missing.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }
    workers.wait_idle();

    println!(
        "{} cached, {} already present, {} without usable art",
        cached.load(Ordering::Relaxed),
        present.load(Ordering::Relaxed),
        missing.load(Ordering::Relaxed)
    );
    Ok(())
}

fn inspect(pipeline: &ArtPipeline, track_path: &Path) {
    let track = Track::new(TrackId::new(track_path.to_string_lossy()), track_path);
    println!("{}", track.display_name());
    println!(
        "  cache file: {}",
        pipeline.disk_cache().path_for(track.path()).display()
    );

    for variant in [ArtVariant::Thumbnail, ArtVariant::Original] {
        match pipeline.load_art(track.path(), variant, None) {
            Some(art) => println!(
                "  {variant}: {}x{} from {:?} ({} bytes)",
                art.image.width(),
                art.image.height(),
                art.origin,
                art.bytes.len()
            ),
            None => println!(
                "  {variant}: none, showing {}",
                pipeline.default_art().display()
            ),
        }
    }
}
