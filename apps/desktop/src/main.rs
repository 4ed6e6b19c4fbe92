use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result};
use capture::{MediaDevices, MissingMediaDevices, StillImageDevices};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings, normalize_api_url},
    ActiveResult, ControllerOptions, HttpAnalysisBackend, SessionController, SessionEvent,
    Settings, Tab,
};
use shared::{
    domain::{is_known_asana, VideoFile, ASANAS},
    error::AnalysisError,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod render;
mod repl;

#[derive(Parser, Debug)]
#[command(about = "Yoga pose analysis client")]
struct Cli {
    /// Base URL of the pose-analysis backend.
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Settings file; defaults to ./yoga-client.toml, then the per-user config dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Request timeout in seconds, 0 disables it.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    #[arg(long, global = true)]
    playback_interval_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the backend API is running.
    Status,
    /// List the asanas the backend model recognizes.
    Poses,
    /// Upload a video and compare it against the expected asana.
    Analyze {
        #[arg(long)]
        video: PathBuf,
        #[arg(long)]
        pose: String,
        /// List every frame card instead of the first few.
        #[arg(long)]
        all_frames: bool,
        /// Write the annotated frame images into this directory.
        #[arg(long)]
        save_frames: Option<PathBuf>,
        /// Browse the frames afterwards (next, prev, play, ...).
        #[arg(long, short)]
        interactive: bool,
    },
    /// Analyze a single still frame, read from an image file instead of a camera.
    Capture {
        #[arg(long)]
        image: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;

    let backend = Arc::new(
        HttpAnalysisBackend::from_settings(&settings).context("failed to build HTTP client")?,
    );
    let devices: Arc<dyn MediaDevices> = match &cli.command {
        Command::Capture { image } => Arc::new(StillImageDevices::new(image.clone())),
        _ => Arc::new(MissingMediaDevices),
    };
    let controller = SessionController::new(backend, devices, ControllerOptions::from(&settings));
    let mut events = controller.subscribe_events();
    info!(api_url = %settings.api_url, "yoga client ready");

    let succeeded = match cli.command {
        Command::Poses => {
            for asana in ASANAS {
                println!("{asana}");
            }
            true
        }
        Command::Status => {
            let outcome = controller.check_backend().await;
            print_notices(&mut events);
            match outcome {
                Ok(()) => {
                    println!("Backend API is running at {}", settings.api_url);
                    true
                }
                Err(err) => {
                    report(&err);
                    false
                }
            }
        }
        Command::Analyze {
            video,
            pose,
            all_frames,
            save_frames,
            interactive,
        } => {
            if !is_known_asana(&pose) {
                warn!(pose = %pose, "expected pose is not one of the trained asanas");
            }
            controller.select_file(read_video(&video).await?);
            controller.set_expected_pose(Some(pose));

            match controller.submit_analysis().await {
                Ok(result) => {
                    if all_frames {
                        controller.toggle_disclosure();
                    }
                    print_notices(&mut events);
                    if let Some(view) = controller.results_view() {
                        println!("{}", render::results(&view));
                    }
                    if let Some(dir) = save_frames {
                        let saved = save_frame_images(&result, &dir).await?;
                        println!("Saved {saved} frame image(s) to {}", dir.display());
                    }
                    if interactive {
                        repl::run(Arc::clone(&controller), events).await?;
                    }
                    true
                }
                Err(err) => {
                    print_notices(&mut events);
                    report(&err);
                    false
                }
            }
        }
        Command::Capture { .. } => {
            controller.switch_tab(Tab::Webcam);
            let outcome = match controller.start_capture().await {
                Ok(()) => controller.capture_and_analyze().await,
                Err(err) => Err(err),
            };
            controller.stop_capture().await;
            print_notices(&mut events);
            match outcome {
                Ok(_) => {
                    if let Some(view) = controller.results_view() {
                        println!("{}", render::results(&view));
                    }
                    true
                }
                Err(err) => {
                    report(&err);
                    false
                }
            }
        }
    };

    controller.shutdown().await;
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// File and environment settings, then command-line flags on top.
fn resolve_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(api_url) = &cli.api_url {
        settings.api_url = normalize_api_url(api_url)?;
    }
    if let Some(secs) = cli.timeout_secs {
        settings.request_timeout_secs = secs;
    }
    if let Some(ms) = cli.playback_interval_ms {
        settings.playback_interval_ms = ms;
    }
    Ok(settings)
}

async fn read_video(path: &Path) -> Result<VideoFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read video '{}'", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    VideoFile::new(name, bytes, None)
        .with_context(|| format!("cannot upload '{}'", path.display()))
}

fn print_notices(events: &mut broadcast::Receiver<SessionEvent>) {
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Notice(notice)) => eprintln!("{}", render::notice(&notice)),
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

fn report(err: &AnalysisError) {
    if let AnalysisError::Server { status, body } = err {
        if let Some(detail) = render::server_detail(*status, body) {
            eprintln!("{detail}");
        }
    }
}

async fn save_frame_images(result: &ActiveResult, dir: &Path) -> Result<usize> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create '{}'", dir.display()))?;

    let mut saved = 0;
    for frame in result.frames() {
        let image = match frame.decode_image() {
            None => continue,
            Some(Ok(image)) => image,
            Some(Err(err)) => {
                warn!(frame = frame.frame_number, error = %err, "skipping frame image");
                continue;
            }
        };
        let path = dir.join(format!(
            "frame_{:04}.{}",
            frame.frame_number + 1,
            image.extension()
        ));
        tokio::fs::write(&path, &image.bytes)
            .await
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        saved += 1;
    }
    Ok(saved)
}
