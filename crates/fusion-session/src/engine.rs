use crate::{Result, SessionError};
use depth_camera::{ColorMap, DepthMap};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Reconstruction engine driven by the acquisition loop.
///
/// Implementations are built from the source's `CameraParameters` and a
/// [`GlobalConfiguration`]; every accepted frame yields exactly one pose.
pub trait ProcessingEngine {
    /// Integrate one frame. `false` means the frame was rejected (for example
    /// tracking was lost) and no pose was recorded for it.
    fn process_frame(&mut self, depth: &DepthMap, color: &ColorMap) -> bool;

    /// Rendering of the current model for display.
    fn last_model_frame(&self) -> ColorMap;

    /// Camera-to-world transforms of all accepted frames, in acquisition order.
    fn poses(&self) -> Vec<Mat4>;

    fn extract_mesh(&self) -> Mesh;
}

/// Triangle mesh; `normals` and `colors`, when present, are per vertex.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub colors: Option<Vec<[u8; 3]>>,
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Tuning knobs handed to the engine. Distances are in millimeters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfiguration {
    /// Voxels per axis.
    pub volume_size: [u32; 3],
    /// Edge length of one voxel.
    pub voxel_scale: f32,
    pub bfilter_kernel_size: u32,
    pub bfilter_color_sigma: f32,
    pub bfilter_spatial_sigma: f32,
    /// Initial camera distance to the volume front face.
    pub init_depth: f32,
    pub use_output_frame: bool,
    pub truncation_distance: f32,
    /// Depth beyond this is ignored.
    pub depth_cutoff_distance: f32,
    /// Pyramid levels used for tracking.
    pub num_levels: usize,
    pub triangles_buffer_size: usize,
    pub pointcloud_buffer_size: usize,
    /// ICP correspondence rejection thresholds.
    pub distance_threshold: f32,
    pub angle_threshold: f32,
    /// ICP iterations per pyramid level, finest first.
    pub icp_iterations: Vec<u32>,
}

impl Default for GlobalConfiguration {
    fn default() -> Self {
        Self {
            volume_size: [512, 512, 512],
            voxel_scale: 2.0,
            bfilter_kernel_size: 5,
            bfilter_color_sigma: 1.0,
            bfilter_spatial_sigma: 1.0,
            init_depth: 1000.0,
            use_output_frame: true,
            truncation_distance: 25.0,
            depth_cutoff_distance: 1000.0,
            num_levels: 3,
            triangles_buffer_size: 3 * 2_000_000,
            pointcloud_buffer_size: 3 * 2_000_000,
            distance_threshold: 10.0,
            angle_threshold: 20.0,
            icp_iterations: vec![10, 5, 4],
        }
    }
}

impl GlobalConfiguration {
    pub fn validate(&self) -> Result<()> {
        if self.volume_size.contains(&0) {
            return Err(SessionError::Config(format!(
                "volume_size must be positive, got {:?}",
                self.volume_size
            )));
        }
        let positive = [
            ("voxel_scale", self.voxel_scale),
            ("bfilter_color_sigma", self.bfilter_color_sigma),
            ("bfilter_spatial_sigma", self.bfilter_spatial_sigma),
            ("truncation_distance", self.truncation_distance),
            ("depth_cutoff_distance", self.depth_cutoff_distance),
            ("distance_threshold", self.distance_threshold),
            ("angle_threshold", self.angle_threshold),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SessionError::Config(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.bfilter_kernel_size == 0 {
            return Err(SessionError::Config(
                "bfilter_kernel_size must be positive".to_string(),
            ));
        }
        if self.num_levels == 0 {
            return Err(SessionError::Config("num_levels must be positive".to_string()));
        }
        if self.icp_iterations.len() != self.num_levels {
            return Err(SessionError::Config(format!(
                "icp_iterations has {} entries for {} pyramid levels",
                self.icp_iterations.len(),
                self.num_levels
            )));
        }
        Ok(())
    }
}
