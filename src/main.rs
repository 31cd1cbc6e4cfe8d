use archive_share::config::{self, Config};
use archive_share::ids::{self, IdScheme};
use archive_share::links::{self, IssueRequest};
use archive_share::store::{Store, unix_now};
use archive_share::thumbnail::{FfmpegTools, Scale, ThumbnailCache};
use archive_share::{output, sweep};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::SystemTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "archive-share")]
#[command(about = "Share files through expiring links with cached thumbnails")]
#[command(long_about = "\
Share files through expiring links with cached thumbnails

Files under configured mounts are shared through short-lived links with
unguessable ids. Thumbnails are created on demand by ffmpeg and cached
under a name derived from the request.

Typical cron setup:

  0 * * * *   archive-share sweep --links
  30 4 * * *  archive-share sweep --cache

Run 'archive-share gen-config' to generate a documented archive-share.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file (missing file = stock defaults)
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and cache directory
    Init,
    /// Reserve ids from the shared counter and print them
    Allocate {
        #[arg(default_value_t = 1)]
        count: u64,
    },
    /// Issue links for files under a mount
    Issue {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        mount: String,
        /// Paths relative to the mount root
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Count a download and print the link
    Open { id: String },
    /// Extend or shorten links and change their disposition
    Edit {
        ids: Vec<String>,
        /// Seconds added to the expiry (negative shortens)
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        delay: i64,
        /// Serve as attachment (true) or inline (false)
        #[arg(long)]
        download: Option<bool>,
        /// Also read ids or download URLs from this file, one per line
        #[arg(long)]
        raw: Option<PathBuf>,
        /// URL prefix stripped from lines read with --raw
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Resolve the thumbnail of a file
    Thumbnail {
        source: PathBuf,
        /// Pixel density, 1 to 4
        #[arg(long, default_value_t = 1)]
        scale: u32,
        #[arg(long)]
        animated: bool,
    },
    /// Resolve the thumbnail of a link, e.g. `k3Xa9@2x`
    LinkThumbnail {
        parameter: String,
        #[arg(long)]
        animated: bool,
    },
    /// Delete expired links and stale thumbnails (both if no flag is given)
    Sweep {
        #[arg(long)]
        links: bool,
        #[arg(long)]
        cache: bool,
    },
    /// Print a stock archive-share.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    // gen-config must work even when the current config file is broken
    let load = || -> Result<(Config, IdScheme), Box<dyn std::error::Error>> {
        let config = config::load_config(&cli.config)?;
        let scheme = config.id_scheme()?;
        Ok((config, scheme))
    };

    match cli.command {
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
        Command::Init => {
            let (config, _) = load()?;
            let store = Store::open(&config.store.database_directory)?;
            std::fs::create_dir_all(&config.thumbnails.cache_directory)?;
            println!("Database: {}", store.path().display());
            println!("Cache: {}", config.thumbnails.cache_directory.display());
        }
        Command::Allocate { count } => {
            let (config, scheme) = load()?;
            let store = Store::open(&config.store.database_directory)?;
            let ids = ids::allocate_ids(&store, &scheme, count)?;
            output::print_lines(&ids);
        }
        Command::Issue {
            owner,
            mount,
            paths,
        } => {
            let (config, scheme) = load()?;
            if !config.mounts.contains_key(&mount) {
                return Err(format!("unknown mount: {mount}").into());
            }
            let store = Store::open(&config.store.database_directory)?;
            let now = unix_now();
            let request = IssueRequest {
                owner,
                mount,
                paths,
            };
            let rows = links::issue_links(
                &store,
                &scheme,
                &request,
                now,
                config.links.download_delay,
            )?;
            output::print_links(&rows, now);
        }
        Command::Open { id } => {
            let (config, scheme) = load()?;
            let store = Store::open(&config.store.database_directory)?;
            let now = unix_now();
            let row = links::open_link(&store, &scheme, &id, now)?;
            output::print_links(&[row], now);
        }
        Command::Edit {
            mut ids,
            delay,
            download,
            raw,
            prefix,
        } => {
            let (config, scheme) = load()?;
            if let Some(raw) = raw {
                let text = std::fs::read_to_string(raw)?;
                ids.extend(links::ids_from_text(&scheme, &text, &prefix));
            }
            let store = Store::open(&config.store.database_directory)?;
            let report = links::edit_links(&store, &scheme, &ids, delay, download)?;
            output::print_edit_report(&report, unix_now());
        }
        Command::Thumbnail {
            source,
            scale,
            animated,
        } => {
            let (config, _) = load()?;
            let scale = Scale::new(scale).ok_or("scale must be between 1 and 4")?;
            let cache = open_cache(&config)?;
            let thumbnail = cache.resolve(&source, scale, animated);
            output::print_lines(&output::format_thumbnail(&thumbnail, cache.directory()));
        }
        Command::LinkThumbnail {
            parameter,
            animated,
        } => {
            let (config, scheme) = load()?;
            let store = Store::open(&config.store.database_directory)?;
            let cache = open_cache(&config)?;
            let thumbnail = links::link_thumbnail(
                &store,
                &scheme,
                &cache,
                &config.mounts,
                &parameter,
                animated,
                unix_now(),
            );
            output::print_lines(&output::format_thumbnail(&thumbnail, cache.directory()));
        }
        Command::Sweep { links, cache } => {
            let (config, _) = load()?;
            let (do_links, do_cache) = if links || cache {
                (links, cache)
            } else {
                (true, true)
            };
            let removed = if do_links {
                let store = Store::open(&config.store.database_directory)?;
                Some(sweep::sweep_links(&store, unix_now())?)
            } else {
                None
            };
            let cache_sweep = do_cache.then(|| {
                sweep::sweep_cache(
                    &config.thumbnails.cache_directory,
                    config.cache_retention(),
                    SystemTime::now(),
                )
            });
            output::print_lines(&output::format_sweep(removed, cache_sweep.as_ref()));
        }
    }

    Ok(())
}

fn open_cache(config: &Config) -> std::io::Result<ThumbnailCache<FfmpegTools>> {
    ThumbnailCache::new(config.thumbnail_settings(), config.ffmpeg_tools())
}

/// Compact logs on stderr. `RUST_LOG` wins over `--log-level`.
fn init_tracing(log_level: &str) {
    let level: tracing::Level = log_level.parse().unwrap_or(tracing::Level::WARN);
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stderr_layer).init();
}
