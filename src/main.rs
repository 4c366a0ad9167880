use clap::{Parser, Subcommand};
use photo_album::album::Album;
use photo_album::manifest::AlbumManifest;
use photo_album::{config, output, scan};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup, called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

/// Shared flags for commands that read photos and a config.
#[derive(clap::Args, Clone)]
struct SourceArgs {
    /// Directory of photos, or an image list file (one name per line, optionally quoted)
    source: PathBuf,

    /// Album config file (see 'photo-album gen-config')
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Include photos in subdirectories
    #[arg(long, short)]
    recursive: bool,
}

#[derive(Parser)]
#[command(name = "photo-album")]
#[command(about = "Turns a folder of photographs into a web photo album")]
#[command(long_about = "\
Turns a folder of photographs into a web photo album

The album is a self-contained directory that any static web server (or a
browser opening the files directly) can show:

  album/
  ├── index.html                   # Entry page, redirects to the viewer
  ├── index_offline.html           # Entry page for the offline viewer
  ├── PhotoAlbum_xs.html           # Viewer, loads slides/*.json at runtime
  ├── PhotoAlbum_fatxs.html        # Viewer with the manifests inlined
  ├── noscript_gallery.html        # Plain HTML pages for browsers without
  ├── noscript_image1.html         # JavaScript
  ├── photos.zip                   # Optional download archive
  └── slides/
      ├── info.json                # Title, presentation settings
      ├── directories.json         # One directory per output size
      ├── filenames.json           # Photos in album order
      ├── captions.json
      ├── resolutions.json         # Actual pixel sizes per photo and size
      ├── 160x160/
      └── 640x480/

Photos are ordered by numeric prefix (02-beach.jpg before 10-sunset.jpg).
A text file with the photo's name and a .txt extension becomes its caption.

Run 'photo-album gen-config' to generate a documented config file.")]
#[command(version = version_string())]
struct Cli {
    /// More log output on stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an album into a new directory
    Build {
        #[command(flatten)]
        source: SourceArgs,

        /// Destination directory; must not exist yet
        destination: PathBuf,

        /// Album title (overrides the config)
        #[arg(long)]
        title: Option<String>,

        /// Also write a download archive with this name (overrides the config)
        #[arg(long)]
        archive: Option<String>,
    },
    /// Validate photos and config without building
    Check {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Summarize an album that was built before
    Inspect {
        /// Album directory
        album: PathBuf,
    },
    /// Print a stock config file with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Build {
            source,
            destination,
            title,
            archive,
        } => {
            let mut config = config::load_config(source.config.as_deref())?;
            if let Some(title) = title {
                config.album.title = title;
            }
            if let Some(archive) = archive {
                config.archive.name = archive;
            }
            config.validate()?;

            let mut album = Album::new(config)?;
            let added = add_photos(&mut album, &source)?;
            if added == 0 {
                return Err(format!("no photos found in {}", source.source.display()).into());
            }
            album.validate_sizes()?;

            println!("==> Building {} photos into {}", added, destination.display());
            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_build_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let report = album.build(&destination, Some(tx));
            printer.join().map_err(|_| "output thread panicked")?;
            tracing::info!(stats = %album.dispatcher().cache().stats(), "image cache");

            if !report.completed {
                let message = if report.message.is_empty() {
                    "build stopped".to_string()
                } else {
                    report.message
                };
                return Err(message.into());
            }
            println!("==> Album complete: {}", destination.display());
        }
        Command::Check { source } => {
            let config = config::load_config(source.config.as_deref())?;
            let mut album = Album::new(config)?;
            album.validate_sizes()?;
            println!("==> Checking {}", source.source.display());
            if source.source.is_dir() {
                let images = scan::scan(&source.source, source.recursive)?;
                output::print_scan_output(&images, &source.source);
                album.add_sources(images);
            } else {
                album.add_image_list(&source.source)?;
            }
            // Every photo must load and scale to all configured sizes.
            let sizes = album.config().images.sizes.clone();
            let invalid: Vec<usize> = (0..album.len())
                .filter(|&i| !album.is_valid(i) || album.resized(i, &sizes).len() != sizes.len())
                .collect();
            for &i in &invalid {
                let item = &album.items()[i];
                println!("unreadable: {}", item.error().unwrap_or(item.dest_name()));
            }
            if invalid.is_empty() {
                println!("==> {} photos, config is valid", album.len());
            } else {
                return Err(format!("{} of {} photos cannot be read", invalid.len(), album.len()).into());
            }
        }
        Command::Inspect { album } => {
            let manifest = AlbumManifest::read(&album)?;
            output::print_inspect_output(&manifest);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Log to stderr so progress on stdout stays readable.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Add the photos of a directory or image list to `album`.
fn add_photos(album: &mut Album, source: &SourceArgs) -> Result<usize, Box<dyn std::error::Error>> {
    let path: &Path = &source.source;
    if path.is_file() {
        Ok(album.add_image_list(path)?)
    } else {
        Ok(album.add_sources(scan::scan(path, source.recursive)?))
    }
}
