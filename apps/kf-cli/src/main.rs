mod log_writer;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use depth_camera::colorize::color_depth;
use depth_camera::{
    ActiveStereoCamera, DepthCamera, DepthMap, MockStereoPipeline, MockStructuredLight,
    ReplayCamera, StereoSource, StructuredLightCamera,
};
use fusion_session::{
    load_config, AcquisitionLoop, AppConfig, CameraKind, PreviewEngine, TerminalConsole,
};
use log_writer::crlf_stderr;
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "kf",
    version,
    about = "RGB-D capture and reconstruction front end",
    disable_help_subcommand = true
)]
struct Cli {
    /// Use in-process mock runtimes instead of live sensors
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the interactive capture loop
    Run {
        /// YAML configuration file
        #[arg(long, short = 'c')]
        config: PathBuf,
    },
    /// Open the configured camera and report what it delivers
    Inspect {
        #[arg(long, short = 'c')]
        config: PathBuf,
        /// Frames to grab
        #[arg(long, default_value_t = 3)]
        frames: usize,
        /// Print JSON instead of text
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        /// Save the last good depth frame as a false-color PNG
        #[arg(long)]
        depth_png: Option<PathBuf>,
    },
    /// List camera backends compiled into this binary
    List,
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config } => run(&config, cli.mock),
        Commands::Inspect {
            config,
            frames,
            json,
            depth_png,
        } => inspect(&config, frames, json, depth_png.as_deref(), cli.mock),
        Commands::List => list_backends(),
    };
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // Raw mode during `run` disables newline translation
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(crlf_stderr)
        .try_init();
}

fn make_camera(cfg: &AppConfig, mock: bool) -> Result<Box<dyn DepthCamera>> {
    match cfg.camera.kind {
        CameraKind::Replay => {
            let dir = cfg.replay_dir();
            let cam = ReplayCamera::open(&dir)
                .with_context(|| format!("opening replay sequence {}", dir.display()))?;
            Ok(Box::new(cam))
        }
        CameraKind::StructuredLight => {
            if mock {
                let cam = StructuredLightCamera::open(MockStructuredLight::new())
                    .context("opening mock structured-light camera")?;
                return Ok(Box::new(cam));
            }
            open_structured_light()
        }
        CameraKind::ActiveStereo => {
            let source = if cfg.camera.live {
                StereoSource::Live
            } else {
                StereoSource::Recording(cfg.recording_file())
            };
            if mock {
                let cam = ActiveStereoCamera::open(MockStereoPipeline::new(), source)
                    .context("opening mock active-stereo camera")?;
                return Ok(Box::new(cam));
            }
            open_active_stereo(source)
        }
    }
}

#[cfg(feature = "openni2")]
fn open_structured_light() -> Result<Box<dyn DepthCamera>> {
    let runtime = depth_camera::OpenNi2Runtime::new().context("initializing OpenNI2")?;
    let cam = StructuredLightCamera::open(runtime).context("opening OpenNI2 camera")?;
    Ok(Box::new(cam))
}

#[cfg(not(feature = "openni2"))]
fn open_structured_light() -> Result<Box<dyn DepthCamera>> {
    anyhow::bail!("OpenNI2 backend not enabled at compile time; rebuild with --features openni2 or use --mock")
}

#[cfg(feature = "realsense")]
fn open_active_stereo(source: StereoSource) -> Result<Box<dyn DepthCamera>> {
    let pipeline = depth_camera::RealSensePipeline::new().context("initializing librealsense")?;
    let cam = ActiveStereoCamera::open(pipeline, source).context("opening RealSense camera")?;
    Ok(Box::new(cam))
}

#[cfg(not(feature = "realsense"))]
fn open_active_stereo(_source: StereoSource) -> Result<Box<dyn DepthCamera>> {
    anyhow::bail!("RealSense backend not enabled at compile time; rebuild with --features realsense or use --mock")
}

fn run(config: &Path, mock: bool) -> Result<()> {
    let cfg = load_config(config)?;
    info!(
        recording = %cfg.recording_name,
        camera = ?cfg.camera.kind,
        "starting session"
    );
    let mut camera = make_camera(&cfg, mock)?;
    let mut engine = PreviewEngine::new(camera.parameters(), &cfg.fusion)?;
    let session = AcquisitionLoop::new(cfg.session_paths());

    let summary = {
        let mut console = TerminalConsole::new(cfg.display.preview_path.clone())?;
        session.run(camera.as_mut(), &mut engine, &mut console)?
    };

    println!(
        "iterations={} processed={} rejected={} skipped={} command={:?}",
        summary.iterations,
        summary.processed_frames,
        summary.rejected_frames,
        summary.acquisition_failures,
        summary.final_command
    );
    for path in &summary.files_written {
        println!("wrote {}", path.display());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct FrameReport {
    index: usize,
    /// RFC 3339 acquisition time
    timestamp: Option<String>,
    width: u32,
    height: u32,
    /// Valid depth range in millimeters
    depth_min_mm: Option<f32>,
    depth_max_mm: Option<f32>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct InspectReport {
    camera: CameraKind,
    parameters: depth_camera::CameraParameters,
    frames: Vec<FrameReport>,
}

/// Grab `frames` frames, reporting each one; also returns the last good depth map.
fn grab_reports(
    camera: &mut dyn DepthCamera,
    frames: usize,
) -> (Vec<FrameReport>, Option<DepthMap>) {
    let mut last_depth = None;
    let reports = (0..frames)
        .map(|index| match camera.grab_frame() {
            Ok(frame) => {
                let (width, height) = frame.dimensions();
                let range = frame.depth_map().valid_range();
                let timestamp = frame.timestamp().and_then(|ts| match ts.format(&Rfc3339) {
                    Ok(s) => Some(s),
                    Err(e) => {
                        warn!("frame {index}: timestamp not formattable: {e}");
                        None
                    }
                });
                last_depth = Some(frame.depth_map().clone());
                FrameReport {
                    index,
                    timestamp,
                    width,
                    height,
                    depth_min_mm: range.map(|r| r.0),
                    depth_max_mm: range.map(|r| r.1),
                    error: None,
                }
            }
            Err(e) => FrameReport {
                index,
                timestamp: None,
                width: 0,
                height: 0,
                depth_min_mm: None,
                depth_max_mm: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    (reports, last_depth)
}

fn save_depth_png(depth: &DepthMap, path: &Path) -> Result<()> {
    color_depth(depth)
        .to_rgb_image()
        .save(path)
        .with_context(|| format!("writing depth preview {}", path.display()))?;
    info!(path = %path.display(), "depth preview written");
    Ok(())
}

fn inspect(
    config: &Path,
    frames: usize,
    json: bool,
    depth_png: Option<&Path>,
    mock: bool,
) -> Result<()> {
    let cfg = load_config(config)?;
    let mut camera = make_camera(&cfg, mock)?;
    let parameters = camera.parameters();
    let (frames, last_depth) = grab_reports(camera.as_mut(), frames);
    if let Some(path) = depth_png {
        let depth = last_depth.context("no frame was grabbed; depth preview not written")?;
        save_depth_png(&depth, path)?;
    }
    let report = InspectReport {
        camera: cfg.camera.kind,
        parameters,
        frames,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    let p = &report.parameters;
    println!(
        "{:?}: {}x{} fx={} fy={} cx={} cy={}",
        report.camera,
        p.image_width,
        p.image_height,
        p.focal_x,
        p.focal_y,
        p.principal_x,
        p.principal_y
    );
    for f in &report.frames {
        match (&f.error, f.depth_min_mm.zip(f.depth_max_mm)) {
            (Some(e), _) => println!("frame {}: error: {e}", f.index),
            (None, Some((lo, hi))) => println!(
                "frame {}: {}x{} depth {lo:.1}..{hi:.1} mm",
                f.index, f.width, f.height
            ),
            (None, None) => println!("frame {}: {}x{} no valid depth", f.index, f.width, f.height),
        }
    }
    Ok(())
}

fn list_backends() -> Result<()> {
    println!("replay\tPNG sequence (seq_cparam.txt, seq_depth/seq_color%05d.png)");
    if cfg!(feature = "openni2") {
        println!("structured_light\topenni2 (live), mock runtime (--mock)");
    } else {
        println!("structured_light\tmock runtime (--mock); enable openni2 via cargo features");
    }
    if cfg!(feature = "realsense") {
        println!("active_stereo\trealsense (live or .bag), mock runtime (--mock)");
    } else {
        println!("active_stereo\tmock runtime (--mock); enable realsense via cargo features");
    }
    Ok(())
}
