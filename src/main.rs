use anyhow::{bail, Context as _, Result};
use basecam::camera::SimulatedFactory;
use basecam::fits::Context;
use basecam::{
    BasecamConfig, CameraOverrides, CameraSystem, ExposeOptions, ImageType, SimulatedSystem,
    VendorSystem,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "basecam")]
#[command(about = "Control scientific cameras and write FITS images")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "basecam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, global = true, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, global = true, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, global = true, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the cameras visible to the vendor library
    List,

    /// Take exposures and write them as FITS files
    Expose {
        /// Camera name from the configuration
        #[arg(long)]
        name: Option<String>,

        /// Camera uid
        #[arg(long)]
        uid: Option<String>,

        /// Exposure time in seconds
        #[arg(short, long, default_value_t = 1.0)]
        exptime: f64,

        /// Image type: bias, dark, flat or object
        #[arg(short = 't', long = "type", default_value = "object")]
        image_type: ImageType,

        /// Number of exposures to take
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Output file; defaults to the configured naming scheme
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration in TOML format and exit
    PrintConfig,

    /// Validate the configuration file and exit
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = init_logging(&args)?;

    info!("Starting basecam v{}", env!("CARGO_PKG_VERSION"));

    let config = BasecamConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    match args.command {
        Command::PrintConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::ValidateConfig => match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                Ok(())
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        },
        Command::List => list_cameras(),
        Command::Expose {
            name,
            uid,
            exptime,
            image_type,
            count,
            output,
        } => {
            expose(
                config,
                name.as_deref(),
                uid.as_deref(),
                exptime,
                image_type,
                count,
                output,
            )
            .await
        }
    }
}

#[cfg(feature = "vimba")]
fn vendor_system() -> Result<Arc<dyn VendorSystem>> {
    let system = basecam::sdk::VimbaSystem::instance()?;
    Ok(Arc::new(*system))
}

#[cfg(not(feature = "vimba"))]
fn vendor_system() -> Result<Arc<dyn VendorSystem>> {
    Ok(Arc::new(SimulatedSystem::with_devices(1)))
}

fn list_cameras() -> Result<()> {
    let vendor = vendor_system()?;
    if let Ok(version) = vendor.version() {
        println!("Vendor library version {}", version);
    }

    let cameras = vendor.cameras()?;
    if cameras.is_empty() {
        println!("No cameras found");
    }
    for camera in cameras {
        println!(
            "{:<20} {:<24} {:<16} {:?}",
            camera.uid(),
            camera.name,
            camera.model,
            camera.access
        );
    }
    Ok(())
}

/// Exposures always go through the simulated backend; every configured uid
/// is attached to it so configured names resolve.
async fn expose(
    config: BasecamConfig,
    name: Option<&str>,
    uid: Option<&str>,
    exptime: f64,
    image_type: ImageType,
    count: usize,
    output: Option<PathBuf>,
) -> Result<()> {
    if count > 1 && output.is_some() {
        bail!("--output can only be used with a single exposure");
    }

    let vendor = Arc::new(SimulatedSystem::with_devices(1));
    for entry in config.cameras.values() {
        vendor.plug(SimulatedSystem::device(&entry.uid));
    }
    let factory = Arc::new(SimulatedFactory::new(Arc::clone(&vendor)));
    let system = CameraSystem::new(vendor, factory, config)?;

    let uid = match (name, uid) {
        (None, None) => Some("DEV_0001"),
        (_, uid) => uid,
    };
    let overrides = CameraOverrides {
        autoconnect: Some(true),
        ..Default::default()
    };
    let camera = system.add_camera(name, uid, false, overrides).await?;

    for _ in 0..count {
        let options = ExposeOptions {
            filename: output.clone(),
            write: true,
            context: Context::new(),
            ..Default::default()
        };
        let exposure = camera.expose(exptime, image_type, options).await?;
        if let Some(filename) = &exposure.filename {
            println!("{}", filename.display());
        }
    }

    system.shutdown().await;
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("basecam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .with_writer(std::io::stderr)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_writer(std::io::stderr).boxed()
        }
    };

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path {}", path.display()))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}
