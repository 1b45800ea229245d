use crate::export::{export_ply, write_poses};
use crate::{Command, Console, ProcessingEngine, Result, SessionPaths};
use depth_camera::DepthCamera;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Key wait per iteration; just long enough to stay responsive.
pub const KEY_WAIT: Duration = Duration::from_millis(1);

/// What happened during one run of the loop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub iterations: usize,
    /// Grabs that failed and were skipped.
    pub acquisition_failures: usize,
    /// Frames the engine refused.
    pub rejected_frames: usize,
    pub processed_frames: usize,
    pub final_command: Option<Command>,
    pub files_written: Vec<PathBuf>,
}

/// Grab, process, display, react to the operator; repeat until a stop key.
pub struct AcquisitionLoop {
    paths: SessionPaths,
    key_wait: Duration,
}

impl AcquisitionLoop {
    pub fn new(paths: SessionPaths) -> Self {
        Self {
            paths,
            key_wait: KEY_WAIT,
        }
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn run(
        &self,
        camera: &mut dyn DepthCamera,
        engine: &mut dyn ProcessingEngine,
        console: &mut dyn Console,
    ) -> Result<LoopSummary> {
        let mut summary = LoopSummary::default();
        loop {
            summary.iterations += 1;
            let iteration = summary.iterations;

            match camera.grab_frame() {
                Ok(frame) => {
                    if engine.process_frame(frame.depth_map(), frame.color_map()) {
                        summary.processed_frames += 1;
                        debug!(iteration, "frame processed");
                    } else {
                        summary.rejected_frames += 1;
                        warn!(iteration, "frame could not be processed");
                    }
                    console.show(&engine.last_model_frame())?;
                }
                Err(e) if e.is_recoverable() => {
                    summary.acquisition_failures += 1;
                    warn!(iteration, "frame skipped: {e}");
                }
                // Sources report every per-frame failure as Acquisition; anything
                // else means the source itself is unusable.
                Err(e) => return Err(e.into()),
            }

            let command = Command::from_key(console.poll_key(self.key_wait)?);
            if !command.stops() {
                continue;
            }
            info!(?command, iterations = iteration, "stopping acquisition");
            if command.saves_poses() {
                info!("saving poses");
                let written = write_poses(&self.paths.poses_dir, &engine.poses())?;
                summary.files_written.extend(written);
            }
            if command.saves_mesh() {
                info!("extracting mesh");
                let mesh = engine.extract_mesh();
                export_ply(&self.paths.mesh_file, &mesh)?;
                summary.files_written.push(self.paths.mesh_file.clone());
            }
            summary.final_command = Some(command);
            return Ok(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Mesh, ScriptedConsole, SessionError};
    use depth_camera::sequence::{color_path, depth_path, PARAMETERS_FILE};
    use depth_camera::{
        CameraParameters, ColorMap, DepthMap, Error as CameraError, InputFrame, ReplayCamera,
    };
    use glam::{Mat4, Vec3};
    use image::{ImageBuffer, Luma, Rgb, RgbImage};
    use std::fs;
    use std::path::Path;

    /// Accepts (or rejects) everything and remembers what it was given.
    struct StubEngine {
        accept: bool,
        seen: Vec<(DepthMap, ColorMap)>,
    }

    impl StubEngine {
        fn accepting() -> Self {
            Self {
                accept: true,
                seen: Vec::new(),
            }
        }

        fn rejecting() -> Self {
            Self {
                accept: false,
                seen: Vec::new(),
            }
        }
    }

    impl ProcessingEngine for StubEngine {
        fn process_frame(&mut self, depth: &DepthMap, color: &ColorMap) -> bool {
            self.seen.push((depth.clone(), color.clone()));
            self.accept
        }

        fn last_model_frame(&self) -> ColorMap {
            ColorMap::filled(2, 2, [0, 0, 0])
        }

        fn poses(&self) -> Vec<Mat4> {
            let accepted = if self.accept { self.seen.len() } else { 0 };
            (0..accepted)
                .map(|i| Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0)))
                .collect()
        }

        fn extract_mesh(&self) -> Mesh {
            Mesh {
                vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                triangles: vec![[0, 1, 2]],
                ..Mesh::default()
            }
        }
    }

    struct FlatCamera {
        fail_every: Option<usize>,
        grabs: usize,
    }

    impl DepthCamera for FlatCamera {
        fn grab_frame(&mut self) -> depth_camera::Result<InputFrame> {
            self.grabs += 1;
            if self.fail_every.is_some_and(|n| self.grabs % n == 0) {
                return Err(CameraError::Acquisition("dropped".to_string()));
            }
            InputFrame::new(DepthMap::zeros(4, 3), ColorMap::filled(4, 3, [9, 9, 9]))
        }

        fn parameters(&self) -> CameraParameters {
            CameraParameters {
                image_width: 4,
                image_height: 3,
                focal_x: 5.0,
                focal_y: 5.0,
                principal_x: 1.5,
                principal_y: 0.5,
            }
        }
    }

    fn flat() -> FlatCamera {
        FlatCamera {
            fail_every: None,
            grabs: 0,
        }
    }

    fn paths(root: &Path) -> SessionPaths {
        SessionPaths {
            poses_dir: root.join("poses").join("rec"),
            mesh_file: root.join("meshes").join("rec.ply"),
        }
    }

    #[test]
    fn discard_stops_without_exports() {
        let dir = tempfile::tempdir().unwrap();
        let session = AcquisitionLoop::new(paths(dir.path()));
        let mut console = ScriptedConsole::after(3, ' ');
        let summary = session
            .run(&mut flat(), &mut StubEngine::accepting(), &mut console)
            .unwrap();
        assert_eq!(summary.iterations, 4);
        assert_eq!(summary.final_command, Some(Command::SaveNothing));
        assert!(summary.files_written.is_empty());
        assert!(!dir.path().join("poses").exists());
        assert!(!dir.path().join("meshes").exists());
        assert_eq!(console.shown().len(), 4);
    }

    #[test]
    fn save_poses_writes_one_file_per_processed_frame() {
        let dir = tempfile::tempdir().unwrap();
        let session = AcquisitionLoop::new(paths(dir.path()));
        let mut console = ScriptedConsole::after(4, 'p');
        let summary = session
            .run(&mut flat(), &mut StubEngine::accepting(), &mut console)
            .unwrap();
        assert_eq!(summary.processed_frames, 5);
        let mut names: Vec<String> = fs::read_dir(dir.path().join("poses").join("rec"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 5);
        assert_eq!(names[0], "seq_pose00000.txt");
        assert_eq!(names[4], "seq_pose00004.txt");
        assert!(!dir.path().join("meshes").exists());
    }

    #[test]
    fn save_all_writes_poses_and_mesh() {
        let dir = tempfile::tempdir().unwrap();
        let session = AcquisitionLoop::new(paths(dir.path()));
        let mut console = ScriptedConsole::after(1, 'a');
        let summary = session
            .run(&mut flat(), &mut StubEngine::accepting(), &mut console)
            .unwrap();
        assert_eq!(summary.files_written.len(), 3);
        assert_eq!(summary.files_written.last(), Some(&session.paths().mesh_file));
        assert!(session.paths().mesh_file.is_file());
    }

    #[test]
    fn save_mesh_only() {
        let dir = tempfile::tempdir().unwrap();
        let session = AcquisitionLoop::new(paths(dir.path()));
        let summary = session
            .run(
                &mut flat(),
                &mut StubEngine::accepting(),
                &mut ScriptedConsole::after(0, 'm'),
            )
            .unwrap();
        assert_eq!(summary.files_written, vec![session.paths().mesh_file.clone()]);
        assert!(!dir.path().join("poses").exists());
    }

    #[test]
    fn rejecting_engine_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let session = AcquisitionLoop::new(paths(dir.path()));
        let summary = session
            .run(
                &mut flat(),
                &mut StubEngine::rejecting(),
                &mut ScriptedConsole::after(6, 'p'),
            )
            .unwrap();
        assert_eq!(summary.iterations, 7);
        assert_eq!(summary.rejected_frames, 7);
        assert_eq!(summary.processed_frames, 0);
        assert!(summary.files_written.is_empty());
    }

    #[test]
    fn acquisition_failures_skip_the_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let session = AcquisitionLoop::new(paths(dir.path()));
        let mut camera = FlatCamera {
            fail_every: Some(2),
            grabs: 0,
        };
        let mut engine = StubEngine::accepting();
        let mut console = ScriptedConsole::after(3, ' ');
        let summary = session.run(&mut camera, &mut engine, &mut console).unwrap();
        assert_eq!(summary.iterations, 4);
        assert_eq!(summary.acquisition_failures, 2);
        assert_eq!(engine.seen.len(), 2);
        assert_eq!(console.shown().len(), 2);
    }

    /// Delivers one frame, then loses the device.
    struct UnpluggedCamera {
        grabs: usize,
    }

    impl DepthCamera for UnpluggedCamera {
        fn grab_frame(&mut self) -> depth_camera::Result<InputFrame> {
            self.grabs += 1;
            if self.grabs > 1 {
                return Err(CameraError::Device("unplugged".to_string()));
            }
            flat().grab_frame()
        }

        fn parameters(&self) -> CameraParameters {
            flat().parameters()
        }
    }

    #[test]
    fn unusable_source_ends_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let session = AcquisitionLoop::new(paths(dir.path()));
        let mut engine = StubEngine::accepting();
        let mut console = ScriptedConsole::after(5, 'a');
        let result = session.run(&mut UnpluggedCamera { grabs: 0 }, &mut engine, &mut console);
        assert!(matches!(
            result,
            Err(SessionError::Camera(CameraError::Device(_)))
        ));
        assert_eq!(engine.seen.len(), 1);
        assert!(!dir.path().join("meshes").exists());
    }

    #[test]
    fn export_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("poses"), b"").unwrap();
        let session = AcquisitionLoop::new(paths(dir.path()));
        let result = session.run(
            &mut flat(),
            &mut StubEngine::accepting(),
            &mut ScriptedConsole::after(0, 'p'),
        );
        assert!(matches!(result, Err(SessionError::Export(_))));
    }

    #[test]
    fn replay_wraps_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source").join("rec");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join(PARAMETERS_FILE), "4 3 5.0 5.0 1.5 1.0").unwrap();
        for i in 0..3u16 {
            let depth: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_fn(4, 3, |x, y| Luma([1000 * (i + 1) + (y * 4 + x) as u16]));
            depth.save(depth_path(&source, i as usize)).unwrap();
            RgbImage::from_fn(4, 3, |x, y| Rgb([i as u8, x as u8, y as u8]))
                .save(color_path(&source, i as usize))
                .unwrap();
        }

        let mut camera = ReplayCamera::open(&source).unwrap();
        let mut engine = StubEngine::accepting();
        let session = AcquisitionLoop::new(paths(dir.path()));
        let summary = session
            .run(&mut camera, &mut engine, &mut ScriptedConsole::after(4, ' '))
            .unwrap();

        assert_eq!(summary.processed_frames, 5);
        assert_eq!(engine.seen.len(), 5);
        assert_eq!(engine.seen[3], engine.seen[0]);
        assert_eq!(engine.seen[4], engine.seen[1]);
        assert_ne!(engine.seen[2], engine.seen[0]);
    }
}
