//! A lightweight engine for dry runs: no volume is fused and the camera is
//! assumed static, but frames are back-projected so the operator sees surface
//! normals and can export the last point cloud.

use crate::{GlobalConfiguration, Mesh, ProcessingEngine, Result};
use depth_camera::colorize::color_normal;
use depth_camera::{CameraParameters, ColorMap, DepthMap};
use glam::{Mat4, Vec3};
use tracing::debug;

pub struct PreviewEngine {
    params: CameraParameters,
    depth_cutoff: f32,
    /// Zero marks a pixel without a valid vertex.
    vertices: Vec<Vec3>,
    normals: Vec<Vec3>,
    colors: Vec<[u8; 3]>,
    poses: Vec<Mat4>,
}

impl PreviewEngine {
    pub fn new(params: CameraParameters, config: &GlobalConfiguration) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            params,
            depth_cutoff: config.depth_cutoff_distance,
            vertices: Vec::new(),
            normals: Vec::new(),
            colors: Vec::new(),
            poses: Vec::new(),
        })
    }

    fn back_project(&self, depth: &DepthMap) -> Vec<Vec3> {
        let p = &self.params;
        let width = depth.width() as usize;
        depth
            .as_slice()
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                if !(d.is_finite() && d > 0.0 && d <= self.depth_cutoff) {
                    return Vec3::ZERO;
                }
                let x = (i % width) as f32;
                let y = (i / width) as f32;
                Vec3::new(
                    (x - p.principal_x) * d / p.focal_x,
                    (y - p.principal_y) * d / p.focal_y,
                    d,
                )
            })
            .collect()
    }
}

/// Normal from the right and lower neighbours; zero where any is missing.
fn compute_normals(vertices: &[Vec3], width: usize, height: usize) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; vertices.len()];
    for y in 0..height.saturating_sub(1) {
        for x in 0..width.saturating_sub(1) {
            let i = y * width + x;
            let (c, r, d) = (vertices[i], vertices[i + 1], vertices[i + width]);
            if c.z == 0.0 || r.z == 0.0 || d.z == 0.0 {
                continue;
            }
            let n = (d - c).cross(r - c).normalize_or_zero();
            normals[i] = n;
        }
    }
    normals
}

impl ProcessingEngine for PreviewEngine {
    fn process_frame(&mut self, depth: &DepthMap, color: &ColorMap) -> bool {
        let expected = self.params.resolution();
        if depth.dimensions() != expected || color.dimensions() != expected {
            debug!(?expected, got = ?depth.dimensions(), "frame size does not match camera");
            return false;
        }
        let (w, h) = expected;
        self.vertices = self.back_project(depth);
        self.normals = compute_normals(&self.vertices, w as usize, h as usize);
        self.colors = (0..h)
            .flat_map(|y| (0..w).map(move |x| (x, y)))
            .map(|(x, y)| color.pixel(x, y).unwrap_or([0, 0, 0]))
            .collect();
        self.poses.push(Mat4::IDENTITY);
        true
    }

    fn last_model_frame(&self) -> ColorMap {
        let (w, h) = self.params.resolution();
        if self.normals.is_empty() {
            return ColorMap::filled(w, h, [0, 0, 0]);
        }
        let raw: Vec<[f32; 3]> = self.normals.iter().map(|n| n.to_array()).collect();
        color_normal(&raw, w, h).unwrap_or_else(|_| ColorMap::filled(w, h, [0, 0, 0]))
    }

    fn poses(&self) -> Vec<Mat4> {
        self.poses.clone()
    }

    fn extract_mesh(&self) -> Mesh {
        let mut mesh = Mesh {
            colors: Some(Vec::new()),
            ..Mesh::default()
        };
        for (i, v) in self.vertices.iter().enumerate() {
            if v.z == 0.0 {
                continue;
            }
            mesh.vertices.push(*v);
            mesh.normals.push(self.normals[i]);
            if let Some(colors) = mesh.colors.as_mut() {
                colors.push(self.colors[i]);
            }
        }
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CameraParameters {
        CameraParameters::new(3, 3, 100.0, 100.0, 1.0, 1.0).unwrap()
    }

    #[test]
    fn plane_faces_the_camera() {
        let mut engine = PreviewEngine::new(params(), &GlobalConfiguration::default()).unwrap();
        let depth = DepthMap::new(3, 3, vec![500.0; 9]).unwrap();
        let color = ColorMap::filled(3, 3, [10, 20, 30]);
        assert!(engine.process_frame(&depth, &color));

        let center = engine.vertices[4];
        assert_eq!(center, Vec3::new(0.0, 0.0, 500.0));
        let n = engine.normals[0];
        assert!((n - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);

        let view = engine.last_model_frame();
        assert_eq!(view.dimensions(), (3, 3));
        // bottom row and right column have no normal
        assert_eq!(view.pixel(2, 2), Some([255, 255, 255]));
    }

    #[test]
    fn cutoff_and_size_are_enforced() {
        let mut engine = PreviewEngine::new(params(), &GlobalConfiguration::default()).unwrap();
        let mut data = vec![500.0; 9];
        data[0] = 0.0;
        data[1] = 5000.0;
        let depth = DepthMap::new(3, 3, data).unwrap();
        assert!(engine.process_frame(&depth, &ColorMap::filled(3, 3, [1, 2, 3])));
        let mesh = engine.extract_mesh();
        assert_eq!(mesh.vertices.len(), 7);
        assert_eq!(mesh.colors.as_ref().map(Vec::len), Some(7));
        assert!(mesh.triangles.is_empty());

        let small = DepthMap::zeros(2, 2);
        assert!(!engine.process_frame(&small, &ColorMap::filled(2, 2, [0, 0, 0])));
        assert_eq!(engine.poses().len(), 1);
    }

    #[test]
    fn blank_view_before_first_frame() {
        let engine = PreviewEngine::new(params(), &GlobalConfiguration::default()).unwrap();
        assert_eq!(engine.last_model_frame(), ColorMap::filled(3, 3, [0, 0, 0]));
        assert!(engine.extract_mesh().is_empty());
    }
}
