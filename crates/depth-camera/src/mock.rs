//! In-process runtimes so sources can be exercised without hardware.

use crate::active_stereo::{FramePair, StereoPipeline, StereoStream, StreamFormat, StreamRequest};
use crate::structured_light::{
    ColorSettings, StreamKind, StructuredLightRuntime, VideoMode, ZeroPlaneInfo,
};
use crate::{CameraParameters, DeviceInfo, Error, PixelFormat, RawFrame, Result};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Synthetic structured-light sensor.
///
/// Depth at raw column `x` is `DEPTH_BASE_MM + x`; color is BGR with the raw
/// column in the blue/green bytes, so tests can check registration after
/// mirroring.
pub struct MockStructuredLight {
    devices: Vec<DeviceInfo>,
    opened: bool,
    depth_mode: Option<VideoMode>,
    color_mode: Option<VideoMode>,
    native_mode: Option<VideoMode>,
    streaming: Vec<StreamKind>,
    failing_stream: Option<StreamKind>,
    settings: ColorSettings,
    sync: bool,
    registration: bool,
    invalid_frames: usize,
    reads_left: Option<usize>,
    depth_buf: Vec<u16>,
    color_buf: Vec<u8>,
    teardown: Arc<AtomicUsize>,
}

impl MockStructuredLight {
    pub const DEPTH_BASE_MM: u16 = 500;

    pub fn new() -> Self {
        Self {
            devices: vec![DeviceInfo {
                name: "Mock PrimeSense".to_string(),
                details: vec![
                    ("vendor".to_string(), Some("mock".to_string())),
                    ("uri".to_string(), Some("mock://0".to_string())),
                ],
            }],
            opened: false,
            depth_mode: None,
            color_mode: None,
            native_mode: None,
            streaming: Vec::new(),
            failing_stream: None,
            settings: ColorSettings {
                exposure: 100,
                gain: 100,
                ..ColorSettings::default()
            },
            sync: true,
            registration: true,
            invalid_frames: 0,
            reads_left: None,
            depth_buf: Vec::new(),
            color_buf: Vec::new(),
            teardown: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn without_devices(mut self) -> Self {
        self.devices.clear();
        self
    }

    pub fn without_depth_color_sync(mut self) -> Self {
        self.sync = false;
        self
    }

    pub fn without_registration(mut self) -> Self {
        self.registration = false;
        self
    }

    /// The first `n` depth reads come back flagged invalid.
    pub fn with_invalid_frames(mut self, n: usize) -> Self {
        self.invalid_frames = n;
        self
    }

    /// After `n` depth reads the device reports itself gone.
    pub fn with_disconnect_after(mut self, n: usize) -> Self {
        self.reads_left = Some(n);
        self
    }

    /// Ignore requested modes and stream at `mode` instead.
    pub fn with_native_mode(mut self, mode: VideoMode) -> Self {
        self.native_mode = Some(mode);
        self
    }

    pub fn with_failing_stream(mut self, stream: StreamKind) -> Self {
        self.failing_stream = Some(stream);
        self
    }

    /// Counts stopped streams plus closed devices.
    pub fn teardown_counter(&self) -> Arc<AtomicUsize> {
        self.teardown.clone()
    }

    /// Raw sensor column encoded in an RGB pixel produced by this mock.
    pub fn column_of(rgb: [u8; 3]) -> u32 {
        (u32::from(rgb[1]) << 8) | u32::from(rgb[2])
    }

    fn mode(&self, stream: StreamKind) -> Result<VideoMode> {
        let requested = match stream {
            StreamKind::Depth => self.depth_mode,
            StreamKind::Color => self.color_mode,
        };
        requested
            .map(|m| self.native_mode.unwrap_or(m))
            .ok_or(Error::Device(format!("{stream:?} mode not configured")))
    }

    fn ensure_streaming(&self, stream: StreamKind) -> Result<VideoMode> {
        if !self.streaming.contains(&stream) {
            return Err(Error::Acquisition(format!("{stream:?} stream not started")));
        }
        self.mode(stream)
    }
}

impl Default for MockStructuredLight {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuredLightRuntime for MockStructuredLight {
    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }

    fn open_first_device(&mut self) -> Result<()> {
        if self.devices.is_empty() {
            return Err(Error::Device("no structured-light device could be opened".to_string()));
        }
        self.opened = true;
        Ok(())
    }

    fn close_device(&mut self) {
        self.opened = false;
        self.teardown.fetch_add(1, Ordering::SeqCst);
    }

    fn set_video_mode(&mut self, stream: StreamKind, mode: VideoMode) -> Result<()> {
        if !self.opened {
            return Err(Error::Device("device not open".to_string()));
        }
        match stream {
            StreamKind::Depth => self.depth_mode = Some(mode),
            StreamKind::Color => self.color_mode = Some(mode),
        }
        Ok(())
    }

    fn video_mode(&self, stream: StreamKind) -> Result<VideoMode> {
        self.mode(stream)
    }

    fn set_auto_exposure(&mut self, enabled: bool) -> Result<()> {
        self.settings.auto_exposure = enabled;
        Ok(())
    }

    fn set_auto_white_balance(&mut self, enabled: bool) -> Result<()> {
        self.settings.auto_white_balance = enabled;
        Ok(())
    }

    fn color_settings(&self) -> Option<ColorSettings> {
        Some(self.settings)
    }

    fn start_stream(&mut self, stream: StreamKind) -> Result<()> {
        if self.failing_stream == Some(stream) {
            return Err(Error::Device(format!("{stream:?} stream failed to start")));
        }
        self.mode(stream)?;
        self.streaming.push(stream);
        Ok(())
    }

    fn stop_stream(&mut self, stream: StreamKind) {
        self.streaming.retain(|s| *s != stream);
        self.teardown.fetch_add(1, Ordering::SeqCst);
    }

    fn set_depth_color_sync(&mut self, _enabled: bool) -> Result<()> {
        if self.sync {
            Ok(())
        } else {
            Err(Error::Device("depth/color sync not supported".to_string()))
        }
    }

    fn set_depth_to_color_registration(&mut self, _enabled: bool) -> Result<()> {
        if self.registration {
            Ok(())
        } else {
            Err(Error::Device("registration not supported".to_string()))
        }
    }

    fn zero_plane_info(&self) -> Result<ZeroPlaneInfo> {
        Ok(ZeroPlaneInfo {
            pixel_size_sxga_mm: 0.1042,
            distance_mm: 120,
            emitter_distance_cm: 7.5,
        })
    }

    fn read_depth(&mut self) -> Result<RawFrame<'_, u16>> {
        let mode = self.ensure_streaming(StreamKind::Depth)?;
        match self.reads_left.as_mut() {
            Some(0) => return Err(Error::Device("device disconnected".to_string())),
            Some(n) => *n -= 1,
            None => {}
        }
        if self.invalid_frames > 0 {
            self.invalid_frames -= 1;
            return Ok(RawFrame {
                width: mode.width,
                height: mode.height,
                valid: false,
                data: None,
            });
        }
        self.depth_buf.clear();
        for _y in 0..mode.height {
            for x in 0..mode.width {
                self.depth_buf.push(Self::DEPTH_BASE_MM + x as u16);
            }
        }
        Ok(RawFrame {
            width: mode.width,
            height: mode.height,
            valid: true,
            data: Some(&self.depth_buf),
        })
    }

    fn read_color(&mut self) -> Result<RawFrame<'_, u8>> {
        let mode = self.ensure_streaming(StreamKind::Color)?;
        self.color_buf.clear();
        for y in 0..mode.height {
            for x in 0..mode.width {
                // BGR
                self.color_buf
                    .extend_from_slice(&[(x & 0xff) as u8, (x >> 8) as u8, (y & 0xff) as u8]);
            }
        }
        Ok(RawFrame {
            width: mode.width,
            height: mode.height,
            valid: true,
            data: Some(&self.color_buf),
        })
    }

    fn color_format(&self) -> PixelFormat {
        PixelFormat::Bgr8
    }
}

/// Synthetic active-stereo pipeline producing a deterministic ramp.
pub struct MockStereoPipeline {
    devices: Vec<DeviceInfo>,
    depth_scale: f32,
    resolution: Option<(u32, u32)>,
    color_format: PixelFormat,
    depth_buf: Vec<u16>,
    color_buf: Vec<u8>,
    stops: Arc<AtomicUsize>,
}

impl MockStereoPipeline {
    /// Resolution used when playing back a recording.
    pub const RECORDED_RESOLUTION: (u32, u32) = (640, 480);

    pub fn new() -> Self {
        Self {
            devices: vec![DeviceInfo {
                name: "Mock Stereo".to_string(),
                details: vec![
                    ("Name".to_string(), Some("Mock Stereo".to_string())),
                    ("Serial Number".to_string(), Some("000000000000".to_string())),
                    ("Firmware Version".to_string(), Some("0.0.0".to_string())),
                    ("Usb Type Descriptor".to_string(), None),
                ],
            }],
            depth_scale: 0.001,
            resolution: None,
            color_format: PixelFormat::Rgb8,
            depth_buf: Vec::new(),
            color_buf: Vec::new(),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn without_devices(mut self) -> Self {
        self.devices.clear();
        self
    }

    pub fn with_depth_scale(mut self, scale: f32) -> Self {
        self.depth_scale = scale;
        self
    }

    /// Deliver color in `format` byte order.
    pub fn with_color_format(mut self, format: PixelFormat) -> Self {
        self.color_format = format;
        self
    }

    pub fn stop_counter(&self) -> Arc<AtomicUsize> {
        self.stops.clone()
    }

    /// Native depth the mock reports at pixel (x, y).
    pub fn native_depth(x: u32, y: u32, width: u32) -> u16 {
        ((y * width + x) % 4000 + 1) as u16
    }

    pub fn color_at(x: u32, y: u32) -> [u8; 3] {
        [(x % 256) as u8, (y % 256) as u8, 128]
    }
}

impl Default for MockStereoPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl StereoPipeline for MockStereoPipeline {
    fn query_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }

    fn start_live(&mut self, requests: &[StreamRequest]) -> Result<()> {
        if self.devices.is_empty() {
            return Err(Error::Device("no device connected".to_string()));
        }
        let depth = requests
            .iter()
            .find(|r| r.stream == StereoStream::Depth && r.format == StreamFormat::Z16)
            .ok_or(Error::Device("no Z16 depth stream requested".to_string()))?;
        self.resolution = Some((depth.width, depth.height));
        Ok(())
    }

    fn start_recording(&mut self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(Error::Device(format!(
                "recording {} could not be opened",
                path.display()
            )));
        }
        self.resolution = Some(Self::RECORDED_RESOLUTION);
        Ok(())
    }

    fn depth_intrinsics(&self) -> Result<CameraParameters> {
        let (w, h) = self
            .resolution
            .ok_or(Error::Device("pipeline not started".to_string()))?;
        CameraParameters::new(w, h, 640.0, 640.0, w as f32 / 2.0, h as f32 / 2.0)
    }

    fn depth_scale(&self) -> Result<f32> {
        Ok(self.depth_scale)
    }

    fn wait_for_frames(&mut self) -> Result<FramePair<'_>> {
        let (w, h) = self
            .resolution
            .ok_or(Error::Acquisition("pipeline not started".to_string()))?;
        self.depth_buf.clear();
        self.color_buf.clear();
        for y in 0..h {
            for x in 0..w {
                self.depth_buf.push(Self::native_depth(x, y, w));
                let [r, g, b] = Self::color_at(x, y);
                match self.color_format {
                    PixelFormat::Rgb8 => self.color_buf.extend_from_slice(&[r, g, b]),
                    PixelFormat::Bgr8 => self.color_buf.extend_from_slice(&[b, g, r]),
                }
            }
        }
        Ok(FramePair {
            depth: RawFrame {
                width: w,
                height: h,
                valid: true,
                data: Some(&self.depth_buf),
            },
            color: RawFrame {
                width: w,
                height: h,
                valid: true,
                data: Some(&self.color_buf),
            },
            color_format: self.color_format,
        })
    }

    fn stop(&mut self) {
        self.resolution = None;
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
