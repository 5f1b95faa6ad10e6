use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate::matcher::ConfiguredMatcher;
use facegate::{config, console, identity, Authenticator, Camera, FrameSource, IdentityStore};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "facegate")]
#[command(version, about = "Webcam face authentication in front of a confidential dashboard")]
struct Cli {
    /// Config file (defaults to facegate.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the camera and authenticate on demand
    Run,
    /// Capture a reference image for a new identity
    Enroll {
        /// Label to enroll (prompted for, defaults to current user)
        #[arg(short, long)]
        label: Option<String>,
    },
    /// Authenticate an image file instead of a camera frame
    Check {
        image: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        label: String,
    },
    /// Report which camera indices can be opened
    Probe {
        /// Number of indices to try, starting at 0
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let cfg = config::load_config(config_path)?;

    match cli.command {
        Commands::Run => run(&cfg),
        Commands::Enroll { label } => enroll(&cfg, label),
        Commands::Check { image } => check(&cfg, &image),
        Commands::List => list(&cfg),
        Commands::Remove { label } => remove(&cfg, &label),
        Commands::Probe { count } => probe(count.unwrap_or(cfg.probe_count)),
        Commands::Config => open_config(&cfg, config_path),
    }
}

fn start_camera(cfg: &config::Config) -> Result<FrameSource> {
    info!("Opening camera: {}", cfg.camera);
    let camera = Camera::open(&cfg.camera).context("Failed to open camera")?;
    let source = FrameSource::spawn(camera, cfg.source_settings());
    if source
        .receiver()
        .wait_newer(None, Duration::from_secs(5))
        .is_none()
    {
        warn!(
            "No frame from {} yet (camera {:?})",
            cfg.camera,
            source.receiver().health()
        );
    }
    Ok(source)
}

fn run(cfg: &config::Config) -> Result<()> {
    let matcher = ConfiguredMatcher::from_config(&cfg.matcher)
        .context("Failed to initialize face matcher")?;
    let auth = Authenticator::new(matcher, cfg.auth_settings());

    let known = IdentityStore::open(&cfg.store_dir).list()?;
    if known.is_empty() {
        warn!(
            "No enrolled faces in {}. Run 'enroll' first.",
            cfg.store_dir.display()
        );
    } else {
        info!("Found {} enrolled face(s)", known.len());
    }

    let source = start_camera(cfg)?;
    let stdin = io::stdin();
    console::run_auth_console(&source.receiver(), &auth, stdin.lock(), io::stdout())?;
    source.stop();
    Ok(())
}

fn enroll(cfg: &config::Config, label: Option<String>) -> Result<()> {
    let store = IdentityStore::open(&cfg.store_dir);
    let default_label = label.or_else(identity::operator_name);
    info!("Enrolling into {}", store.dir().display());

    let source = start_camera(cfg)?;
    let stdin = io::stdin();
    let saved = console::run_enroll_console(
        &source.receiver(),
        &store,
        default_label.as_deref(),
        stdin.lock(),
        io::stdout(),
    )?;
    source.stop();

    match saved {
        Some(path) => info!("✓ Face enrolled: {}", path.display()),
        None => info!("Enrollment cancelled"),
    }
    Ok(())
}

fn check(cfg: &config::Config, image: &Path) -> Result<()> {
    let matcher = ConfiguredMatcher::from_config(&cfg.matcher)
        .context("Failed to initialize face matcher")?;
    let auth = Authenticator::new(matcher, cfg.auth_settings());
    let decision = auth
        .authenticate_file(image)
        .with_context(|| format!("authenticating {}", image.display()))?;
    println!("{decision}");
    if !decision.is_granted() {
        std::process::exit(1);
    }
    Ok(())
}

fn list(cfg: &config::Config) -> Result<()> {
    let known = IdentityStore::open(&cfg.store_dir).list()?;
    if known.is_empty() {
        info!("No enrolled faces in {}", cfg.store_dir.display());
    }
    for k in known {
        println!("{}\t{}", k.label, k.path.display());
    }
    Ok(())
}

fn remove(cfg: &config::Config, label: &str) -> Result<()> {
    let store = IdentityStore::open(&cfg.store_dir);
    if store.remove(label).context("Failed to remove identity")? {
        info!("✓ Removed {}", label);
    } else {
        warn!("No enrolled face for {}", label);
    }
    Ok(())
}

fn probe(count: usize) -> Result<()> {
    let results = facegate::probe::probe_devices(count);
    for r in &results {
        match &r.outcome {
            Ok(card) => println!("Camera {} is available: {} ({})", r.index, r.path, card),
            Err(e) => info!("Camera {} unavailable: {}", r.index, e),
        }
    }
    if !results.iter().any(|r| r.is_available()) {
        anyhow::bail!("No camera could be opened in indices 0..{}", count);
    }
    Ok(())
}

fn open_config(cfg: &config::Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&config::CONFIG_PATH);
    if !path.exists() {
        config::save_config(cfg, Some(path))?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", path.display());

    let status = std::process::Command::new(editor)
        .arg(path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
