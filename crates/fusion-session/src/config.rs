use crate::GlobalConfiguration;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Which acquisition technology backs the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraKind {
    Replay,
    StructuredLight,
    ActiveStereo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(rename = "type")]
    pub kind: CameraKind,
    /// Active stereo only: stream from a device instead of a recording file.
    #[serde(default = "default_live")]
    pub live: bool,
}

fn default_live() -> bool {
    true
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Mirror every rendered view to this PNG.
    #[serde(default)]
    pub preview_path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub data_path: PathBuf,
    pub recording_name: String,
    pub camera: CameraConfig,
    #[serde(default)]
    pub fusion: GlobalConfiguration,
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Where a session writes its results.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionPaths {
    pub poses_dir: PathBuf,
    pub mesh_file: PathBuf,
}

impl AppConfig {
    /// Directory holding a recorded image sequence.
    pub fn replay_dir(&self) -> PathBuf {
        self.data_path.join("source").join(&self.recording_name)
    }

    /// Recording file played back by an active-stereo source.
    pub fn recording_file(&self) -> PathBuf {
        self.data_path
            .join("source")
            .join(format!("{}.bag", self.recording_name))
    }

    pub fn session_paths(&self) -> SessionPaths {
        SessionPaths {
            poses_dir: self.data_path.join("poses").join(&self.recording_name),
            mesh_file: self
                .data_path
                .join("meshes")
                .join(format!("{}.ply", self.recording_name)),
        }
    }
}

pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<AppConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let cfg: AppConfig =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    if cfg.recording_name.is_empty() {
        anyhow::bail!("{}: recording_name must not be empty", path.display());
    }
    cfg.fusion
        .validate()
        .with_context(|| format!("checking fusion settings: {}", path.display()))?;
    Ok(cfg)
}
