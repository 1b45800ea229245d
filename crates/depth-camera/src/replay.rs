use crate::sequence::{color_path, depth_path, PARAMETERS_FILE};
use crate::{CameraParameters, ColorMap, DepthCamera, DepthMap, Error, InputFrame, Result};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Replays a recorded `seq_depth%05d.png` / `seq_color%05d.png` sequence,
/// starting over from the first frame once the recording runs out.
pub struct ReplayCamera {
    data_path: PathBuf,
    params: CameraParameters,
    current_index: usize,
}

impl ReplayCamera {
    /// Open a recorded sequence directory containing `seq_cparam.txt`.
    pub fn open(data_path: impl AsRef<Path>) -> Result<Self> {
        let data_path = data_path.as_ref().to_path_buf();
        let param_path = data_path.join(PARAMETERS_FILE);
        let raw = fs::read_to_string(&param_path).map_err(|e| {
            Error::Configuration(format!(
                "camera parameters could not be read from {}: {e}",
                param_path.display()
            ))
        })?;
        let params = CameraParameters::parse(&raw)?;
        info!(
            path = %data_path.display(),
            width = params.image_width,
            height = params.image_height,
            "opened replay sequence"
        );
        Ok(Self {
            data_path,
            params,
            current_index: 0,
        })
    }

    /// Index of the frame the next grab will try to load.
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    fn load_depth(&self) -> (usize, Result<DepthMap>) {
        let index = self.current_index;
        match image::open(depth_path(&self.data_path, index)) {
            Ok(img) => (index, depth_from_image(img)),
            Err(e) => {
                // End of the recording: start over.
                debug!(index, error = %e, "depth frame unavailable, rewinding to frame 0");
                let first = image::open(depth_path(&self.data_path, 0))
                    .map_err(|e| Error::Acquisition(format!("first depth frame unreadable: {e}")))
                    .and_then(depth_from_image);
                (0, first)
            }
        }
    }
}

impl DepthCamera for ReplayCamera {
    fn grab_frame(&mut self) -> Result<InputFrame> {
        let (index, depth) = self.load_depth();
        self.current_index = index + 1;
        let depth = depth?;

        let color_file = color_path(&self.data_path, index);
        let color = image::open(&color_file).map_err(|e| {
            Error::Acquisition(format!("{} unreadable: {e}", color_file.display()))
        })?;
        let color = ColorMap::from_rgb_image(color.to_rgb8());

        let frame = InputFrame::new(depth, color)?;
        frame.ensure_resolution(&self.params)?;
        debug!(index, "replayed frame");
        Ok(frame)
    }

    fn parameters(&self) -> CameraParameters {
        self.params
    }
}

/// Keep native depth values; 16-bit recordings already hold millimeters.
fn depth_from_image(img: DynamicImage) -> Result<DepthMap> {
    match img {
        DynamicImage::ImageLuma16(buf) => {
            let (w, h) = buf.dimensions();
            DepthMap::from_native(w, h, buf.as_raw(), 1.0)
        }
        DynamicImage::ImageLuma8(buf) => {
            let (w, h) = buf.dimensions();
            DepthMap::new(w, h, buf.as_raw().iter().map(|&d| d as f32).collect())
        }
        other => Err(Error::Acquisition(format!(
            "depth image must be single channel, got {:?}",
            other.color()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb, RgbImage};
    use tempfile::TempDir;

    const W: u32 = 8;
    const H: u32 = 6;

    fn write_frame(dir: &Path, index: usize, w: u32, h: u32) {
        let base = (index as u16 + 1) * 100;
        let depth: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(w, h, |x, y| Luma([base + (y * w + x) as u16]));
        depth.save(depth_path(dir, index)).unwrap();
        let color = RgbImage::from_fn(w, h, |x, y| Rgb([index as u8 * 10, x as u8, y as u8]));
        color.save(color_path(dir, index)).unwrap();
    }

    fn sequence(frames: usize) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PARAMETERS_FILE), "8 6 525.0 525.0 3.5 2.5\n").unwrap();
        for i in 0..frames {
            write_frame(dir.path(), i, W, H);
        }
        dir
    }

    #[test]
    fn missing_parameters_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ReplayCamera::open(dir.path()),
            Err(Error::Configuration(_))
        ));
        fs::write(dir.path().join(PARAMETERS_FILE), "8 6 nope").unwrap();
        assert!(matches!(
            ReplayCamera::open(dir.path()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn frames_match_reported_parameters() {
        let dir = sequence(2);
        let mut cam = ReplayCamera::open(dir.path()).unwrap();
        let params = cam.parameters();
        let frame = cam.grab_frame().unwrap();
        assert_eq!(frame.depth_map().dimensions(), params.resolution());
        assert_eq!(frame.color_map().dimensions(), params.resolution());
        assert_eq!(frame.depth_map().get(1, 0), Some(101.0));
        assert_eq!(frame.color_map().pixel(3, 2), Some([0, 3, 2]));
    }

    #[test]
    fn sequence_wraps_after_last_frame() {
        let dir = sequence(3);
        let mut cam = ReplayCamera::open(dir.path()).unwrap();
        let mut frames = Vec::new();
        for _ in 0..3 {
            assert!(cam.current_index() < 3);
            frames.push(cam.grab_frame().unwrap());
        }
        let wrapped = cam.grab_frame().unwrap();
        assert_eq!(wrapped.depth_map(), frames[0].depth_map());
        assert_eq!(wrapped.color_map(), frames[0].color_map());
        assert_eq!(cam.current_index(), 1);
    }

    #[test]
    fn missing_depth_yields_first_frame() {
        let dir = sequence(3);
        fs::remove_file(depth_path(dir.path(), 1)).unwrap();
        let mut cam = ReplayCamera::open(dir.path()).unwrap();
        let first = cam.grab_frame().unwrap();
        let again = cam.grab_frame().unwrap();
        assert_eq!(again.depth_map(), first.depth_map());
        assert_eq!(again.color_map(), first.color_map());
    }

    #[test]
    fn missing_color_fails_but_advances() {
        let dir = sequence(2);
        fs::remove_file(color_path(dir.path(), 0)).unwrap();
        let mut cam = ReplayCamera::open(dir.path()).unwrap();
        assert!(matches!(cam.grab_frame(), Err(Error::Acquisition(_))));
        assert_eq!(cam.current_index(), 1);
        assert!(cam.grab_frame().is_ok());
    }

    #[test]
    fn resolution_mismatch_is_an_acquisition_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PARAMETERS_FILE), "640 480 525 525 319.5 239.5").unwrap();
        write_frame(dir.path(), 0, W, H);
        let mut cam = ReplayCamera::open(dir.path()).unwrap();
        let err = cam.grab_frame().unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn empty_directory_fails_every_grab() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PARAMETERS_FILE), "8 6 525 525 3.5 2.5").unwrap();
        let mut cam = ReplayCamera::open(dir.path()).unwrap();
        assert!(cam.grab_frame().is_err());
        assert!(cam.grab_frame().is_err());
    }
}
