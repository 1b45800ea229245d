//! Live or recorded capture from active-stereo / time-of-flight pipelines.

use crate::{
    CameraParameters, ColorMap, DepthCamera, DepthMap, DeviceInfo, Error, InputFrame, PixelFormat,
    RawFrame, Result,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StereoStream {
    Depth,
    Color,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamFormat {
    /// 16-bit native depth units
    Z16,
    Rgb8,
    Bgr8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamRequest {
    pub stream: StereoStream,
    pub width: u32,
    pub height: u32,
    pub format: StreamFormat,
    pub fps: u32,
}

/// Streams requested from a live device: same size for both, RGB color.
pub const LIVE_STREAMS: [StreamRequest; 2] = [
    StreamRequest {
        stream: StereoStream::Color,
        width: 1280,
        height: 720,
        format: StreamFormat::Rgb8,
        fps: 30,
    },
    StreamRequest {
        stream: StereoStream::Depth,
        width: 1280,
        height: 720,
        format: StreamFormat::Z16,
        fps: 30,
    },
];

/// A synchronized pair lent by the pipeline until the next wait.
pub struct FramePair<'a> {
    pub depth: RawFrame<'a, u16>,
    pub color: RawFrame<'a, u8>,
    pub color_format: PixelFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StereoSource {
    Live,
    Recording(PathBuf),
}

/// Operations the vendor pipeline has to provide.
pub trait StereoPipeline {
    fn query_devices(&mut self) -> Result<Vec<DeviceInfo>>;

    /// Start streaming from the first connected device.
    fn start_live(&mut self, requests: &[StreamRequest]) -> Result<()>;

    /// Start playback of a recording in place of a device.
    fn start_recording(&mut self, path: &Path) -> Result<()>;

    /// Intrinsics of the active depth stream.
    fn depth_intrinsics(&self) -> Result<CameraParameters>;

    /// Meters per native depth unit, as reported by the depth sensor.
    fn depth_scale(&self) -> Result<f32>;

    /// Block until a synchronized depth+color pair arrives.
    fn wait_for_frames(&mut self) -> Result<FramePair<'_>>;

    fn stop(&mut self);
}

/// Stops the pipeline when dropped, once it has been started.
struct Running<P: StereoPipeline> {
    pipeline: P,
    started: bool,
}

impl<P: StereoPipeline> Drop for Running<P> {
    fn drop(&mut self) {
        if self.started {
            self.pipeline.stop();
            debug!("stereo pipeline stopped");
        }
    }
}

pub struct ActiveStereoCamera<P: StereoPipeline> {
    running: Running<P>,
    params: CameraParameters,
    depth_scale: f32,
    source: StereoSource,
}

impl<P: StereoPipeline> ActiveStereoCamera<P> {
    pub fn open(pipeline: P, source: StereoSource) -> Result<Self> {
        match source {
            StereoSource::Live => Self::open_live(pipeline),
            StereoSource::Recording(path) => Self::open_recording(pipeline, path),
        }
    }

    /// Use the first connected device.
    pub fn open_live(pipeline: P) -> Result<Self> {
        let mut running = Running {
            pipeline,
            started: false,
        };
        let devices = running.pipeline.query_devices()?;
        let Some(device) = devices.first() else {
            return Err(Error::Device("no active-stereo device detected".to_string()));
        };
        info!(name = %device.name, "using active-stereo device");
        for (key, value) in &device.details {
            info!(
                "  {key:<20} : {}",
                value.as_deref().unwrap_or("Not supported")
            );
        }

        running.pipeline.start_live(&LIVE_STREAMS)?;
        running.started = true;
        Self::finish(running, StereoSource::Live)
    }

    /// Play back a recording instead of a device.
    pub fn open_recording(pipeline: P, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut running = Running {
            pipeline,
            started: false,
        };
        running.pipeline.start_recording(path)?;
        running.started = true;
        info!(path = %path.display(), "playing active-stereo recording");
        Self::finish(running, StereoSource::Recording(path.to_path_buf()))
    }

    fn finish(running: Running<P>, source: StereoSource) -> Result<Self> {
        let params = running.pipeline.depth_intrinsics()?;
        let depth_scale = running.pipeline.depth_scale()?;
        if !(depth_scale.is_finite() && depth_scale > 0.0) {
            return Err(Error::Device(format!(
                "device reported depth scale {depth_scale}"
            )));
        }
        info!(
            width = params.image_width,
            height = params.image_height,
            fx = params.focal_x,
            fy = params.focal_y,
            depth_scale,
            "active-stereo camera ready"
        );
        Ok(Self {
            running,
            params,
            depth_scale,
            source,
        })
    }

    /// Meters per native depth unit.
    pub fn depth_scale(&self) -> f32 {
        self.depth_scale
    }

    pub fn mm_per_unit(&self) -> f32 {
        self.depth_scale * 1000.0
    }

    pub fn source(&self) -> &StereoSource {
        &self.source
    }
}

impl<P: StereoPipeline> DepthCamera for ActiveStereoCamera<P> {
    fn grab_frame(&mut self) -> Result<InputFrame> {
        let mm_per_unit = self.mm_per_unit();
        let pair = self
            .running
            .pipeline
            .wait_for_frames()
            .map_err(Error::during_grab)?;

        let depth = DepthMap::from_native(
            pair.depth.width,
            pair.depth.height,
            pair.depth.pixels("depth", 1)?,
            mm_per_unit,
        )?;

        // Recordings keep whatever byte order they were captured with.
        let color = ColorMap::from_raw(
            pair.color.width,
            pair.color.height,
            pair.color.pixels("color", 3)?.to_vec(),
            pair.color_format,
        )?;

        let frame = InputFrame::new(depth, color)?;
        frame.ensure_resolution(&self.params)?;
        Ok(frame)
    }

    fn parameters(&self) -> CameraParameters {
        self.params
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::MockStereoPipeline;

    #[test]
    fn live_requires_a_device() {
        let p = MockStereoPipeline::new().without_devices();
        assert!(matches!(
            ActiveStereoCamera::open_live(p),
            Err(Error::Device(_))
        ));
    }

    #[test]
    fn live_uses_fixed_stream_configuration() {
        let cam = ActiveStereoCamera::open_live(MockStereoPipeline::new()).unwrap();
        let p = cam.parameters();
        assert_eq!(p.resolution(), (1280, 720));
        assert_eq!(cam.source(), &StereoSource::Live);
    }

    #[test]
    fn depth_is_scaled_to_millimeters() {
        let pipeline = MockStereoPipeline::new().with_depth_scale(0.000_125);
        let mut cam = ActiveStereoCamera::open_live(pipeline).unwrap();
        let frame = cam.grab_frame().unwrap();
        let params = cam.parameters();
        assert_eq!(frame.depth_map().dimensions(), params.resolution());
        assert_eq!(frame.color_map().dimensions(), params.resolution());
        for &(x, y) in &[(0u32, 0u32), (17, 3), (1279, 719)] {
            let native = MockStereoPipeline::native_depth(x, y, params.image_width) as f32;
            let mm = frame.depth_map().get(x, y).unwrap();
            assert!((mm - native * 0.000_125 * 1000.0).abs() < 1e-3);
        }
    }

    #[test]
    fn color_is_not_mirrored_or_reordered() {
        let mut cam = ActiveStereoCamera::open_live(MockStereoPipeline::new()).unwrap();
        let frame = cam.grab_frame().unwrap();
        assert_eq!(
            frame.color_map().pixel(5, 2),
            Some(MockStereoPipeline::color_at(5, 2))
        );
    }

    #[test]
    fn recording_mode_opens_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let bag = dir.path().join("room.bag");
        std::fs::write(&bag, b"").unwrap();
        let cam = ActiveStereoCamera::open(
            MockStereoPipeline::new().without_devices(),
            StereoSource::Recording(bag.clone()),
        )
        .unwrap();
        assert_eq!(cam.source(), &StereoSource::Recording(bag));
    }

    #[test]
    fn recorded_bgr_color_is_reordered() {
        let dir = tempfile::tempdir().unwrap();
        let bag = dir.path().join("bgr.bag");
        std::fs::write(&bag, b"").unwrap();
        let pipeline = MockStereoPipeline::new().with_color_format(PixelFormat::Bgr8);
        let mut cam = ActiveStereoCamera::open_recording(pipeline, &bag).unwrap();
        let params = cam.parameters();
        for _ in 0..2 {
            let frame = cam.grab_frame().unwrap();
            assert_eq!(frame.dimensions(), params.resolution());
            assert_eq!(
                frame.color_map().pixel(7, 3),
                Some(MockStereoPipeline::color_at(7, 3))
            );
        }
    }

    #[test]
    fn missing_recording_is_a_device_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ActiveStereoCamera::open_recording(MockStereoPipeline::new(), dir.path().join("x.bag")),
            Err(Error::Device(_))
        ));
    }

    #[test]
    fn invalid_depth_scale_is_rejected() {
        let pipeline = MockStereoPipeline::new().with_depth_scale(0.0);
        assert!(ActiveStereoCamera::open_live(pipeline).is_err());
    }

    #[test]
    fn pipeline_stops_on_drop() {
        let pipeline = MockStereoPipeline::new();
        let stops = pipeline.stop_counter();
        let cam = ActiveStereoCamera::open_live(pipeline).unwrap();
        drop(cam);
        assert_eq!(stops.load(std::sync::atomic::Ordering::SeqCst), 1);

        // started but rejected during setup: still stopped
        let pipeline = MockStereoPipeline::new().with_depth_scale(-1.0);
        let stops = pipeline.stop_counter();
        assert!(ActiveStereoCamera::open_live(pipeline).is_err());
        assert_eq!(stops.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
