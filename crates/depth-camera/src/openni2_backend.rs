use crate::structured_light::{
    ColorSettings, StreamKind, StructuredLightRuntime, VideoMode, ZeroPlaneInfo,
};
use crate::{DeviceInfo, Error, PixelFormat, RawFrame, Result};
use openni2::{
    Device, ImageRegistrationMode, OniDepthPixel, OniRGB888Pixel, PixelFormat as OniPixelFormat,
    SensorType, Stream, VideoMode as OniVideoMode,
};
use tracing::debug;

// PS1080 depth stream properties
const ZERO_PLANE_DISTANCE: i32 = 0x1080_F003;
const ZERO_PLANE_PIXEL_SIZE: i32 = 0x1080_F004;
const EMITTER_DCMOS_DISTANCE: i32 = 0x1080_F005;

/// Streams borrow the device for as long as they exist. The device is
/// leaked so both can live in the runtime; its handle is reclaimed when the
/// process exits.
struct Opened {
    device: &'static Device,
    depth: Stream<'static>,
    color: Stream<'static>,
}

/// OpenNI2 runtime for PrimeSense, Xtion and Kinect-class sensors.
/// Frames are copied into owned buffers before they are lent out.
pub struct OpenNi2Runtime {
    opened: Option<Opened>,
    depth_buf: Vec<u16>,
    color_buf: Vec<u8>,
}

impl OpenNi2Runtime {
    pub fn new() -> Result<Self> {
        openni2::init().map_err(|e| Error::Device(format!("OpenNI2 init failed: {e:?}")))?;
        Ok(Self {
            opened: None,
            depth_buf: Vec::new(),
            color_buf: Vec::new(),
        })
    }

    fn opened(&self) -> Result<&Opened> {
        opened(&self.opened)
    }

    fn stream(&self, kind: StreamKind) -> Result<&Stream<'static>> {
        let opened = self.opened()?;
        Ok(match kind {
            StreamKind::Depth => &opened.depth,
            StreamKind::Color => &opened.color,
        })
    }
}

// Free function so reads can borrow the buffers alongside the streams.
fn opened(opened: &Option<Opened>) -> Result<&Opened> {
    opened
        .as_ref()
        .ok_or_else(|| Error::Device("no OpenNI2 device open".to_string()))
}

fn status(what: &str) -> impl Fn(openni2::Status) -> Error + '_ {
    move |e| Error::Device(format!("{what}: {e:?}"))
}

fn read_status(what: &str) -> impl Fn(openni2::Status) -> Error + '_ {
    move |e| Error::Acquisition(format!("{what}: {e:?}"))
}

impl StructuredLightRuntime for OpenNi2Runtime {
    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        let devices = openni2::get_device_list();
        Ok(devices
            .into_iter()
            .map(|d| DeviceInfo {
                name: d.name,
                details: vec![
                    ("vendor".to_string(), Some(d.vendor)),
                    ("uri".to_string(), Some(d.uri)),
                    (
                        "usb id".to_string(),
                        Some(format!("{:04x}:{:04x}", d.usb_vendor_id, d.usb_product_id)),
                    ),
                ],
            })
            .collect())
    }

    fn open_first_device(&mut self) -> Result<()> {
        let device = Device::open_default().map_err(status("device could not be opened"))?;
        let device: &'static Device = Box::leak(Box::new(device));
        let depth = device
            .create_stream(SensorType::DEPTH)
            .map_err(status("depth stream could not be created"))?;
        let color = device
            .create_stream(SensorType::COLOR)
            .map_err(status("color stream could not be created"))?;
        self.opened = Some(Opened {
            device,
            depth,
            color,
        });
        Ok(())
    }

    fn close_device(&mut self) {
        // dropping the streams destroys them
        self.opened = None;
        debug!("OpenNI2 streams destroyed");
    }

    fn set_video_mode(&mut self, stream: StreamKind, mode: VideoMode) -> Result<()> {
        let pixel_format = match stream {
            StreamKind::Depth => OniPixelFormat::DEPTH_1_MM,
            StreamKind::Color => OniPixelFormat::RGB888,
        };
        self.stream(stream)?
            .set_video_mode(OniVideoMode {
                pixel_format,
                resolution_x: mode.width as i32,
                resolution_y: mode.height as i32,
                fps: mode.fps as i32,
            })
            .map_err(status("video mode rejected"))
    }

    fn video_mode(&self, stream: StreamKind) -> Result<VideoMode> {
        let mode = self
            .stream(stream)?
            .get_video_mode()
            .map_err(status("video mode unavailable"))?;
        let dim = |v: i32| {
            u32::try_from(v).map_err(|_| Error::Device(format!("stream reported size {v}")))
        };
        Ok(VideoMode {
            width: dim(mode.resolution_x)?,
            height: dim(mode.resolution_y)?,
            fps: dim(mode.fps)?,
        })
    }

    fn set_auto_exposure(&mut self, enabled: bool) -> Result<()> {
        self.stream(StreamKind::Color)?
            .set_auto_exposure(enabled)
            .map_err(status("auto exposure"))
    }

    fn set_auto_white_balance(&mut self, enabled: bool) -> Result<()> {
        self.stream(StreamKind::Color)?
            .set_auto_white_balance(enabled)
            .map_err(status("auto white balance"))
    }

    fn color_settings(&self) -> Option<ColorSettings> {
        let color = self.stream(StreamKind::Color).ok()?;
        Some(ColorSettings {
            auto_exposure: color.get_auto_exposure().ok()?,
            auto_white_balance: color.get_auto_white_balance().ok()?,
            exposure: color.get_exposure().ok()?,
            gain: color.get_gain().ok()?,
        })
    }

    fn start_stream(&mut self, stream: StreamKind) -> Result<()> {
        self.stream(stream)?
            .start()
            .map_err(status("stream could not be started"))
    }

    fn stop_stream(&mut self, stream: StreamKind) {
        if let Ok(s) = self.stream(stream) {
            s.stop();
        }
    }

    fn set_depth_color_sync(&mut self, enabled: bool) -> Result<()> {
        self.opened()?
            .device
            .set_depth_color_sync_enabled(enabled)
            .map_err(status("depth/color sync"))
    }

    fn set_depth_to_color_registration(&mut self, enabled: bool) -> Result<()> {
        let mode = if enabled {
            ImageRegistrationMode::DepthToColor
        } else {
            ImageRegistrationMode::Off
        };
        self.opened()?
            .device
            .set_image_registration_mode(mode)
            .map_err(status("image registration"))
    }

    fn zero_plane_info(&self) -> Result<ZeroPlaneInfo> {
        let depth = self.stream(StreamKind::Depth)?;
        let pixel_size_sxga_mm = depth
            .get_property::<f64>(ZERO_PLANE_PIXEL_SIZE)
            .map_err(status("zero-plane pixel size"))?;
        let distance = depth
            .get_property::<u64>(ZERO_PLANE_DISTANCE)
            .map_err(status("zero-plane distance"))?;
        let emitter_distance_cm = depth
            .get_property::<f64>(EMITTER_DCMOS_DISTANCE)
            .map_err(status("emitter distance"))?;
        Ok(ZeroPlaneInfo {
            pixel_size_sxga_mm,
            distance_mm: u32::try_from(distance)
                .map_err(|_| Error::Device(format!("zero-plane distance {distance} mm")))?,
            emitter_distance_cm,
        })
    }

    fn read_depth(&mut self) -> Result<RawFrame<'_, u16>> {
        let frame = opened(&self.opened)?
            .depth
            .read_frame::<OniDepthPixel>()
            .map_err(read_status("depth read failed"))?;
        let (width, height) = (frame.width(), frame.height());
        self.depth_buf.clear();
        self.depth_buf.extend_from_slice(frame.pixels());
        Ok(RawFrame {
            width: width as u32,
            height: height as u32,
            valid: true,
            data: Some(&self.depth_buf),
        })
    }

    fn read_color(&mut self) -> Result<RawFrame<'_, u8>> {
        let frame = opened(&self.opened)?
            .color
            .read_frame::<OniRGB888Pixel>()
            .map_err(read_status("color read failed"))?;
        let (width, height) = (frame.width(), frame.height());
        self.color_buf.clear();
        for p in frame.pixels() {
            self.color_buf.extend_from_slice(&[p.r, p.g, p.b]);
        }
        Ok(RawFrame {
            width: width as u32,
            height: height as u32,
            valid: true,
            data: Some(&self.color_buf),
        })
    }

    fn color_format(&self) -> PixelFormat {
        PixelFormat::Rgb8
    }
}
