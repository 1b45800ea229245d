//! File naming shared by recorded sequences and exported trajectories.

use std::path::{Path, PathBuf};

/// Calibration record stored next to a recorded sequence.
pub const PARAMETERS_FILE: &str = "seq_cparam.txt";

pub fn depth_file_name(index: usize) -> String {
    format!("seq_depth{index:05}.png")
}

pub fn color_file_name(index: usize) -> String {
    format!("seq_color{index:05}.png")
}

pub fn pose_file_name(index: usize) -> String {
    format!("seq_pose{index:05}.txt")
}

pub fn depth_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(depth_file_name(index))
}

pub fn color_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(color_file_name(index))
}
