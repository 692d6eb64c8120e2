use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ratingslight::backup::{self, RestoreCursor, RestoreOptions, RetentionPolicy};
use ratingslight::commands::{Command, CommandContext, CommandResult, Commands as CommandRunner, RatingInput};
use ratingslight::config::AppConfig;
use ratingslight::db::Database;
use ratingslight::export::{self, ExportOptions};
use ratingslight::host::{ScanFlag, StaticLibraryViews};
use ratingslight::mix::catalog::MixCatalog;
use ratingslight::mix::{MixEngine, MixRequest, ParamValue};
use ratingslight::ops::Coordinator;
use ratingslight::schedule::{parse_time, BackupSchedule, TaskQueue};
use ratingslight::store::RatingStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ratingslight", version, about = "Track ratings, rating-weighted mixes and rating backups")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rate a track: stars ("3", "3.5"), points ("80", "40%") or a change ("+1", "-0.5")
    Rate {
        track_id: i64,
        #[arg(allow_hyphen_values = true)]
        rating: String,
    },

    /// Show a track's rating, or library rating statistics
    Show { track_id: Option<i64> },

    /// Clear every rating
    Clear {
        /// Required, this cannot be undone except from a backup
        #[arg(long)]
        yes: bool,
    },

    /// Print the rating menu (or the actions menu) for a track as JSON
    Menu {
        track_id: i64,

        /// Player the menu is rendered for
        #[arg(long, default_value = "cli")]
        client: String,

        /// Show the actions menu instead of the rating menu
        #[arg(long)]
        actions: bool,
    },

    /// List other rated tracks by the same artist
    MoreByArtist {
        track_id: i64,

        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "cli")]
        client: String,
    },

    /// Give every track of a saved playlist the same rating
    RatePlaylist {
        playlist_id: i64,
        rating: String,
    },

    /// List the available mixes and their parameters
    Mixes,

    /// Generate a rating-weighted mix
    Mix {
        /// Mix id (see `mixes`)
        mix_id: String,

        /// Mix parameter as key=value (e.g. percentage=30, genre=4, decade=1970, playstate=unplayed)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Number of tracks (defaults to config mix.limit)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Requesting player; continuous mixes skip its recent history
        #[arg(long)]
        client: Option<String>,

        /// Restrict to this virtual library (needs --client)
        #[arg(long, requires = "client")]
        library: Option<String>,

        /// Print JSON instead of one url per line
        #[arg(long)]
        json: bool,
    },

    /// Write a backup of every rating
    Backup,

    /// Restore ratings from a backup file
    Restore {
        file: PathBuf,

        /// Keep existing ratings instead of clearing them first
        #[arg(long)]
        no_clear: bool,

        /// Records parsed per step (defaults to config backup.restore_batch_size)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Delete expired backups
    Prune,

    /// Show the next scheduled backup, or run the scheduler
    Schedule {
        /// Keep running and back up at the scheduled time
        #[arg(long)]
        run: bool,

        /// Backup time HH:MM (overrides config backup.time)
        #[arg(long)]
        time: Option<String>,
    },

    /// Import ratings from comment-tag keywords
    Import {
        /// Clear all ratings before importing
        #[arg(long)]
        clear: bool,
    },

    /// Export ratings to one playlist per star rating
    Export {
        /// Output directory (defaults to config export.dir)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Only tracks whose rating disagrees with their comment keyword
        #[arg(long)]
        only_mismatched: bool,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_command(runner: &CommandRunner, ctx: &CommandContext, command: Command) -> Result<CommandResult> {
    runner
        .execute(ctx, &command)
        .with_context(|| format!("{command:?} failed"))
}

fn parse_mix_params(mix_id: &str, raw: &[String]) -> Result<Vec<(String, ParamValue)>> {
    let spec = MixCatalog::get(mix_id).with_context(|| format!("Unknown mix {mix_id:?}, see `mixes`"))?;
    raw.iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("Expected KEY=VALUE, got {pair:?}"))?;
            let descriptor = spec
                .param(key.trim())
                .with_context(|| format!("Mix {mix_id} has no parameter {key:?}"))?;
            let value = ParamValue::parse(descriptor.kind, value).map_err(anyhow::Error::msg)?;
            Ok((descriptor.id.to_string(), value))
        })
        .collect()
}

fn main() -> Result<()> {
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

    // Load config file (optional, defaults if missing)
    let mut config = AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(ratingslight::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = Database::open(&db_path).context("Failed to open database")?;
    // Standalone: nothing rescans the library behind our back
    let scan = Arc::new(ScanFlag::new());
    let store = RatingStore::new(db, scan.clone(), Coordinator::new());
    let runner = CommandRunner::new(&store, config.half_stars);

    match cli.command {
        Commands::Rate { track_id, rating } => {
            let input: RatingInput = rating.parse()?;
            let result = run_command(&runner, &CommandContext::default(), Command::SetRating { track_id, input })?;
            if let CommandResult::Rated { rating, .. } = result {
                println!("Track {track_id}: {} ({rating})", rating.to_star_text(config.half_stars));
            }
        }

        Commands::Show { track_id: Some(track_id) } => {
            let track = store
                .db()
                .catalog_by_id(track_id)?
                .with_context(|| format!("No track with id {track_id}"))?;
            let rating = store.read(&track.url);
            println!("{}", track.title.as_deref().unwrap_or(&track.url));
            println!("  {} ({rating})", rating.to_star_text(config.half_stars));
        }

        Commands::Show { track_id: None } => {
            let stats = store.db().rating_stats()?;
            println!("Tracks: {}", stats.total_tracks);
            println!("Rated:  {}", stats.rated_tracks);
            for (i, n) in stats.by_stars.iter().enumerate().rev() {
                let stars = ratingslight::rating::Rating::from_stars((i + 1) as f64);
                println!("  {}  {n}", stars.to_star_text(false));
            }
        }

        Commands::Clear { yes } => {
            if !yes {
                anyhow::bail!("Refusing to clear every rating without --yes");
            }
            if store.clear_all() {
                println!("All ratings cleared");
            } else {
                anyhow::bail!("Ratings were not cleared, see the log (-v)");
            }
        }

        Commands::Menu { track_id, client, actions } => {
            let command = if actions {
                Command::ActionsMenu { track_id }
            } else {
                Command::RatingMenu { track_id }
            };
            let result = run_command(&runner, &CommandContext::for_client(&client), command)?;
            print_json(&result)?;
        }

        Commands::MoreByArtist { track_id, limit, client } => {
            let result = run_command(
                &runner,
                &CommandContext::for_client(&client),
                Command::MoreRatedByArtist { track_id, limit },
            )?;
            print_json(&result)?;
        }

        Commands::RatePlaylist { playlist_id, rating } => {
            let input: RatingInput = rating.parse()?;
            let result = run_command(
                &runner,
                &CommandContext::default(),
                Command::RatePlaylist { playlist_id, input },
            )?;
            if let CommandResult::PlaylistRated { written, rating, .. } = result {
                println!("Rated {written} tracks of playlist {playlist_id}: {rating}");
            }
        }

        Commands::Mixes => {
            for mix in MixCatalog::all() {
                let params: Vec<&str> = mix.params.iter().map(|p| p.id).collect();
                println!("{:<26} {}", mix.id, mix.name);
                if !params.is_empty() {
                    println!("{:<26} params: {}", "", params.join(", "));
                }
            }
        }

        Commands::Mix { mix_id, params, limit, client, library, json } => {
            let mut request = MixRequest::new(&mix_id, limit.unwrap_or(config.mix.limit));
            for (key, value) in parse_mix_params(&mix_id, &params)? {
                request = request.with_param(&key, value);
            }
            let mut views = StaticLibraryViews::new();
            if let Some(client) = &client {
                request = request.for_client(client);
                if let Some(library) = &library {
                    views.select(client, library);
                }
            }
            let engine = MixEngine::new(&config.mix, scan.as_ref(), &views);
            let tracks = engine
                .generate(store.db(), &request)
                .with_context(|| format!("Mix {mix_id} failed"))?;
            if json {
                print_json(&tracks)?;
            } else {
                for track in &tracks {
                    println!("{track}");
                }
            }
        }

        Commands::Backup => {
            match backup::write_backup(store.db(), store.coordinator(), &config, Local::now())
                .context("Backup failed")?
            {
                Some(report) => {
                    println!("Backed up {} ratings to {}", report.written, report.path.display());
                    if report.ignored > 0 {
                        println!("  {} ignored (gone from library or remote without id)", report.ignored);
                    }
                    for path in &report.pruned {
                        println!("  deleted old backup {}", path.display());
                    }
                }
                None => println!("A backup is already running"),
            }
        }

        Commands::Restore { file, no_clear, batch_size } => {
            let mut options = RestoreOptions::from_config(&config);
            options.clear_first &= !no_clear;
            if let Some(n) = batch_size {
                options.batch_size = n;
            }
            let Some(mut cursor) = RestoreCursor::open(&file, &store, options)
                .with_context(|| format!("Cannot restore from {}", file.display()))?
            else {
                println!("Restore not started: one is already running or the library is being scanned");
                return Ok(());
            };

            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}").unwrap());
            {
                let mut queue = TaskQueue::new();
                queue.push("restore", || {
                    let more = cursor.tick(&store);
                    let stats = cursor.stats();
                    pb.set_message(format!("{} restored, {} ignored", stats.restored, stats.ignored));
                    pb.tick();
                    more
                });
                queue.run_until_idle();
            }
            pb.finish_and_clear();

            let stats = cursor.finish().context("Restore failed")?;
            println!("Restore complete: {} restored, {} ignored", stats.restored, stats.ignored);
        }

        Commands::Prune => {
            let policy = RetentionPolicy::from_config(&config.backup);
            let dir = config.backup_dir();
            let deleted = policy.prune(&dir, Local::now()).context("Prune failed")?;
            println!("Deleted {} old backups from {}", deleted.len(), dir.display());
        }

        Commands::Schedule { run, time } => {
            if let Some(time) = time {
                parse_time(&time)?;
                config.backup.time = time;
            }
            config.backup.scheduled |= run;
            let Some(mut schedule) = BackupSchedule::from_config(&config.backup, Local::now())? else {
                println!("Scheduled backups are off (set backup.scheduled = true, or pass --run)");
                return Ok(());
            };
            println!("Next backup at {}", schedule.due_at().format("%Y-%m-%d %H:%M"));
            if !run {
                return Ok(());
            }
            loop {
                let now = Local::now();
                if schedule.is_due(now) {
                    match backup::write_backup(store.db(), store.coordinator(), &config, now) {
                        Ok(Some(report)) => println!("Backed up {} ratings to {}", report.written, report.path.display()),
                        Ok(None) => log::warn!("Skipped scheduled backup, one is already running"),
                        Err(e) => log::error!("Scheduled backup failed: {e}"),
                    }
                    schedule.mark_run(now);
                }
                let wait = (schedule.due_at() - Local::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .clamp(Duration::from_secs(1), Duration::from_secs(60));
                std::thread::sleep(wait);
            }
        }

        Commands::Import { clear } => {
            config.import.clear_before_import |= clear;
            match ratingslight::import::import_from_comments(&store, &config).context("Import failed")? {
                Some(report) => println!("Imported {} ratings from comment tags", report.imported),
                None => println!("An import is already running"),
            }
        }

        Commands::Export { dir, only_mismatched } => {
            let mut options = ExportOptions::from_config(&config);
            if let Some(dir) = dir {
                options.dir = dir;
            }
            options.only_mismatched |= only_mismatched;
            match export::export_playlists(store.db(), store.coordinator(), &options, Local::now())
                .context("Export failed")?
            {
                Some(report) => {
                    println!("Exported {} tracks to {} playlists", report.exported, report.files.len());
                    for path in &report.files {
                        println!("  {}", path.display());
                    }
                }
                None => println!("An export is already running"),
            }
        }
    }

    Ok(())
}
