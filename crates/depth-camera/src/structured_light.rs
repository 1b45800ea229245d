//! Live capture from PrimeSense-style structured-light sensors.
//!
//! These sensors do not expose projection parameters directly. The focal
//! length is derived from the zero-plane constants reported by the depth
//! stream, and the principal point is assumed to be the image center.
//! The sensor is mounted mirrored, so both maps are flipped horizontally.

use crate::{
    CameraParameters, ColorMap, DepthCamera, DepthMap, DeviceInfo, Error, InputFrame, PixelFormat,
    RawFrame, Result,
};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamKind {
    Depth,
    Color,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Mode requested for both streams.
pub const VGA_30HZ: VideoMode = VideoMode {
    width: 640,
    height: 480,
    fps: 30,
};

/// Physical constants reported by the depth stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZeroPlaneInfo {
    /// Pixel size at the zero plane for SXGA output, in millimeters.
    pub pixel_size_sxga_mm: f64,
    /// Distance from the sensor to the zero plane, in millimeters.
    pub distance_mm: u32,
    /// Emitter to depth CMOS distance, in centimeters.
    pub emitter_distance_cm: f64,
}

impl ZeroPlaneInfo {
    /// VGA pixels are twice the size of SXGA pixels.
    pub fn pixel_size_vga_mm(&self) -> f64 {
        self.pixel_size_sxga_mm * 2.0
    }

    pub fn baseline_mm(&self) -> f64 {
        self.emitter_distance_cm * 10.0
    }
}

/// Color camera settings as reported after configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ColorSettings {
    pub auto_exposure: bool,
    pub auto_white_balance: bool,
    pub exposure: i32,
    pub gain: i32,
}

/// Operations the vendor runtime has to provide.
///
/// Frames returned by the read calls borrow runtime-owned buffers that the
/// next read on the same stream overwrites.
pub trait StructuredLightRuntime {
    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>>;

    /// Open the first available device.
    fn open_first_device(&mut self) -> Result<()>;

    fn close_device(&mut self);

    fn set_video_mode(&mut self, stream: StreamKind, mode: VideoMode) -> Result<()>;

    /// Mode the stream is actually running with.
    fn video_mode(&self, stream: StreamKind) -> Result<VideoMode>;

    fn set_auto_exposure(&mut self, enabled: bool) -> Result<()>;

    fn set_auto_white_balance(&mut self, enabled: bool) -> Result<()>;

    /// `None` when the color stream has no settings interface.
    fn color_settings(&self) -> Option<ColorSettings>;

    fn start_stream(&mut self, stream: StreamKind) -> Result<()>;

    fn stop_stream(&mut self, stream: StreamKind);

    fn set_depth_color_sync(&mut self, enabled: bool) -> Result<()>;

    fn set_depth_to_color_registration(&mut self, enabled: bool) -> Result<()>;

    fn zero_plane_info(&self) -> Result<ZeroPlaneInfo>;

    /// Native depth in millimeters, one value per pixel.
    fn read_depth(&mut self) -> Result<RawFrame<'_, u16>>;

    /// Interleaved 8-bit color, three values per pixel.
    fn read_color(&mut self) -> Result<RawFrame<'_, u8>>;

    fn color_format(&self) -> PixelFormat;
}

/// Derive pinhole intrinsics from the zero-plane constants.
///
/// Focal length in pixels is the zero-plane distance divided by the VGA pixel
/// size, truncated to whole pixels. Only valid for 640x480 output.
pub fn intrinsics_from_zero_plane(
    info: &ZeroPlaneInfo,
    width: u32,
    height: u32,
) -> Result<CameraParameters> {
    let pixel_size = info.pixel_size_vga_mm();
    if !(pixel_size.is_finite() && pixel_size > 0.0) {
        return Err(Error::Device(format!(
            "sensor reported zero-plane pixel size {}",
            info.pixel_size_sxga_mm
        )));
    }
    let focal = (f64::from(info.distance_mm) / pixel_size).trunc() as f32;
    CameraParameters::new(
        width,
        height,
        focal,
        focal,
        (width / 2) as f32 - 0.5,
        (height / 2) as f32 - 0.5,
    )
    .map_err(|e| Error::Device(format!("sensor constants give invalid intrinsics: {e}")))
}

/// Owns the runtime and undoes whatever was brought up, in reverse order.
struct Session<R: StructuredLightRuntime> {
    runtime: R,
    device_open: bool,
    started: Vec<StreamKind>,
}

impl<R: StructuredLightRuntime> Session<R> {
    fn start(&mut self, stream: StreamKind) -> Result<()> {
        self.runtime.start_stream(stream)?;
        self.started.push(stream);
        Ok(())
    }
}

impl<R: StructuredLightRuntime> Drop for Session<R> {
    fn drop(&mut self) {
        while let Some(stream) = self.started.pop() {
            self.runtime.stop_stream(stream);
        }
        if self.device_open {
            self.runtime.close_device();
            debug!("structured-light device closed");
        }
    }
}

pub struct StructuredLightCamera<R: StructuredLightRuntime> {
    session: Session<R>,
    params: CameraParameters,
}

impl<R: StructuredLightRuntime> StructuredLightCamera<R> {
    /// Open the first device on `runtime` and start both streams.
    pub fn open(runtime: R) -> Result<Self> {
        let mut session = Session {
            runtime,
            device_open: false,
            started: Vec::new(),
        };

        let devices = session.runtime.enumerate_devices()?;
        info!(count = devices.len(), "structured-light devices found");
        for dev in &devices {
            info!(name = %dev.name, details = ?dev.details, "device");
        }

        session.runtime.open_first_device().map_err(|e| match e {
            Error::Device(_) => e,
            other => Error::Device(format!("device could not be opened: {other}")),
        })?;
        session.device_open = true;

        session.runtime.set_video_mode(StreamKind::Depth, VGA_30HZ)?;
        session.start(StreamKind::Depth)?;

        session.runtime.set_video_mode(StreamKind::Color, VGA_30HZ)?;
        if let Err(e) = session.runtime.set_auto_exposure(true) {
            warn!("auto exposure unavailable: {e}");
        }
        if let Err(e) = session.runtime.set_auto_white_balance(true) {
            warn!("auto white balance unavailable: {e}");
        }
        if let Some(s) = session.runtime.color_settings() {
            info!(
                auto_exposure = s.auto_exposure,
                auto_white_balance = s.auto_white_balance,
                exposure = s.exposure,
                gain = s.gain,
                "color camera settings"
            );
        }
        session.start(StreamKind::Color)?;

        if let Err(e) = session.runtime.set_depth_color_sync(true) {
            warn!("depth/color sync is disabled: {e}");
        }
        if let Err(e) = session.runtime.set_depth_to_color_registration(true) {
            warn!("depth-to-color registration is disabled: {e}");
        }

        let zero_plane = session.runtime.zero_plane_info()?;
        let mode = session.runtime.video_mode(StreamKind::Depth)?;
        if (mode.width, mode.height) != (VGA_30HZ.width, VGA_30HZ.height) {
            warn!(
                width = mode.width,
                height = mode.height,
                "depth stream is not 640x480; focal length derivation assumes VGA"
            );
        }
        let params = intrinsics_from_zero_plane(&zero_plane, mode.width, mode.height)?;
        info!(
            focal = params.focal_x,
            baseline_mm = zero_plane.baseline_mm(),
            "structured-light camera ready"
        );

        Ok(Self { session, params })
    }
}

impl<R: StructuredLightRuntime> DepthCamera for StructuredLightCamera<R> {
    fn grab_frame(&mut self) -> Result<InputFrame> {
        let runtime = &mut self.session.runtime;

        let raw = runtime.read_depth().map_err(Error::during_grab)?;
        let mut depth = DepthMap::from_native(raw.width, raw.height, raw.pixels("depth", 1)?, 1.0)?;

        let format = runtime.color_format();
        let raw = runtime.read_color().map_err(Error::during_grab)?;
        let mut color =
            ColorMap::from_raw(raw.width, raw.height, raw.pixels("color", 3)?.to_vec(), format)?;

        depth.mirror_horizontal();
        color.mirror_horizontal();

        let frame = InputFrame::new(depth, color)?;
        frame.ensure_resolution(&self.params)?;
        Ok(frame)
    }

    fn parameters(&self) -> CameraParameters {
        self.params
    }
}
