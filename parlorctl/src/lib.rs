use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tracing::{info, warn};

use parlor_core::http::{stream_router, AppState};
use parlor_core::{
    load_stream_config, CapabilityDetector, CommandExecutor, MediaProber, SessionCoordinator,
    SourceResolver, StreamConfig, SystemCommandExecutor,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] parlor_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("probe error: {0}")]
    Probe(#[from] parlor_core::ProbeError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Parlor streaming server control interface", long_about = None)]
pub struct Cli {
    /// Path to parlor.toml; built-in defaults apply when the file is absent
    #[arg(long, default_value = "configs/parlor.toml")]
    pub config: PathBuf,
    /// Output format for introspection commands
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the streaming server
    Serve(ServeArgs),
    /// Inspect a media file with the configured prober
    Probe(ProbeArgs),
    /// Report encoder availability and hardware acceleration support
    Capabilities,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1")]
    pub addr: String,
    #[arg(long, default_value_t = 8096)]
    pub port: u16,
    /// Directory whose files are addressable by file name as media ids
    #[arg(long, default_value = "media")]
    pub media_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    pub file: PathBuf,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    match &cli.command {
        Commands::Serve(args) => serve(config, args).await,
        Commands::Probe(args) => probe(config, args, cli.format).await,
        Commands::Capabilities => capabilities(config, cli.format).await,
    }
}

fn load_config(path: &Path) -> Result<StreamConfig> {
    if path.exists() {
        Ok(load_stream_config(path)?)
    } else {
        Ok(StreamConfig::default())
    }
}

async fn serve(config: StreamConfig, args: &ServeArgs) -> Result<()> {
    let executor: Arc<dyn CommandExecutor> = Arc::new(SystemCommandExecutor);
    let detector = CapabilityDetector::new(
        config.binaries.ffmpeg_path.clone(),
        Arc::clone(&executor),
    );
    let capabilities = detector.detect().await;
    if !capabilities.is_encoder_available() {
        warn!("encoder binary not found; sessions will fail until one is installed");
    }

    let prober = MediaProber::new(config.binaries.ffprobe_path.clone(), executor);
    let resolver = Arc::new(DirectoryResolver::new(args.media_dir.clone()));
    let coordinator = Arc::new(SessionCoordinator::new(config, prober, resolver));
    let _reaper = coordinator.spawn_reaper();

    let app = stream_router(AppState {
        coordinator,
        capabilities,
    });
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", args.addr, args.port)).await?;
    info!(addr = %args.addr, port = args.port, "parlor streaming server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn probe(config: StreamConfig, args: &ProbeArgs, format: OutputFormat) -> Result<()> {
    let prober = MediaProber::new(
        config.binaries.ffprobe_path.clone(),
        Arc::new(SystemCommandExecutor),
    );
    let probe = prober.probe(&args.file).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&probe)?),
        OutputFormat::Text => {
            println!("container:   {}", probe.container);
            println!("duration:    {:.1}s", probe.duration_s);
            println!("video:       {} {}x{} @ {:.3} fps", probe.video_codec, probe.width, probe.height, probe.framerate);
            println!("audio:       {}", probe.audio_codec.as_deref().unwrap_or("none"));
            println!("bitrate:     {} bps", probe.bitrate_bps);
        }
    }
    Ok(())
}

async fn capabilities(config: StreamConfig, format: OutputFormat) -> Result<()> {
    let detector = CapabilityDetector::new(
        config.binaries.ffmpeg_path.clone(),
        Arc::new(SystemCommandExecutor),
    );
    let capabilities = detector.detect().await;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&capabilities)?),
        OutputFormat::Text => {
            println!("encoder available: {}", capabilities.encoder_available);
            println!("hw acceleration:   {}", capabilities.hardware.available);
            if let Some(accelerator) = &capabilities.hardware.accelerator {
                println!("accelerator:       {accelerator}");
            }
            for encoder in &capabilities.hardware.encoders {
                println!("hw encoder:        {encoder}");
            }
        }
    }
    Ok(())
}

/// Minimal catalog stand-in: media ids are plain file names under one
/// directory. Ids that are not a single path component never touch the
/// filesystem.
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl SourceResolver for DirectoryResolver {
    fn resolve(&self, media_id: &str) -> Option<PathBuf> {
        let mut components = Path::new(media_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return None,
        }
        let path = self.root.join(media_id);
        path.is_file().then_some(path)
    }
}
