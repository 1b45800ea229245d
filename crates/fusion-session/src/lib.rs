//! fusion-session: interactive RGB-D capture loop with pose and mesh export

mod error;
pub use error::{Result, SessionError};

mod engine;
pub use engine::{GlobalConfiguration, Mesh, ProcessingEngine};

mod config;
pub use config::{load_config, AppConfig, CameraConfig, CameraKind, DisplayConfig, SessionPaths};

mod command;
pub use command::Command;

/// Pose and mesh writers
pub mod export;

mod console;
pub use console::{Console, ScriptedConsole, TerminalConsole};

mod session;
pub use session::{AcquisitionLoop, LoopSummary, KEY_WAIT};

mod preview;
pub use preview::PreviewEngine;
