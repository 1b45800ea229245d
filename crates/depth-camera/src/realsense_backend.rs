use crate::active_stereo::{FramePair, StereoPipeline, StereoStream, StreamFormat, StreamRequest};
use crate::{CameraParameters, DeviceInfo, Error, PixelFormat, RawFrame, Result};
use realsense_rust::{
    config::Config,
    context::Context,
    frame::{ColorFrame, DepthFrame, PixelKind},
    kind::{Rs2CameraInfo, Rs2Format, Rs2Option, Rs2StreamKind},
    pipeline::{ActivePipeline, InactivePipeline},
};
use std::collections::HashSet;
use std::ffi::CString;
use std::path::Path;
use tracing::debug;

const INFO_FIELDS: [(Rs2CameraInfo, &str); 6] = [
    (Rs2CameraInfo::Name, "Name"),
    (Rs2CameraInfo::SerialNumber, "Serial Number"),
    (Rs2CameraInfo::FirmwareVersion, "Firmware Version"),
    (Rs2CameraInfo::PhysicalPort, "Physical Port"),
    (Rs2CameraInfo::ProductId, "Product Id"),
    (Rs2CameraInfo::UsbTypeDescriptor, "Usb Type Descriptor"),
];

enum State {
    Idle(InactivePipeline),
    Active(ActivePipeline),
    Stopped,
}

/// librealsense2 pipeline. Frames are copied pixel by pixel into owned
/// buffers so nothing outlives the vendor frame handles.
pub struct RealSensePipeline {
    context: Context,
    state: State,
    depth_buf: Vec<u16>,
    color_buf: Vec<u8>,
}

impl RealSensePipeline {
    pub fn new() -> Result<Self> {
        let context =
            Context::new().map_err(|e| Error::Device(format!("realsense context: {e}")))?;
        let pipeline = InactivePipeline::try_from(&context)
            .map_err(|e| Error::Device(format!("realsense pipeline: {e}")))?;
        Ok(Self {
            context,
            state: State::Idle(pipeline),
            depth_buf: Vec::new(),
            color_buf: Vec::new(),
        })
    }

    fn start(&mut self, config: Config) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Stopped) {
            State::Idle(pipeline) => {
                let active = pipeline
                    .start(Some(config))
                    .map_err(|e| Error::Device(format!("pipeline failed to start: {e}")))?;
                self.state = State::Active(active);
                Ok(())
            }
            other => {
                self.state = other;
                Err(Error::Device("pipeline already started".to_string()))
            }
        }
    }

    fn active(&self) -> Result<&ActivePipeline> {
        match &self.state {
            State::Active(active) => Ok(active),
            _ => Err(Error::Device("pipeline not started".to_string())),
        }
    }
}

fn stream_kind(stream: StereoStream) -> Rs2StreamKind {
    match stream {
        StereoStream::Depth => Rs2StreamKind::Depth,
        StereoStream::Color => Rs2StreamKind::Color,
    }
}

fn stream_format(format: StreamFormat) -> Rs2Format {
    match format {
        StreamFormat::Z16 => Rs2Format::Z16,
        StreamFormat::Rgb8 => Rs2Format::Rgb8,
        StreamFormat::Bgr8 => Rs2Format::Bgr8,
    }
}

impl StereoPipeline for RealSensePipeline {
    fn query_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        let devices = self.context.query_devices(HashSet::new());
        Ok(devices
            .iter()
            .map(|dev| {
                let field = |kind| dev.info(kind).map(|s| s.to_string_lossy().into_owned());
                DeviceInfo {
                    name: field(Rs2CameraInfo::Name).unwrap_or_else(|| "RealSense".to_string()),
                    details: INFO_FIELDS
                        .iter()
                        .map(|(kind, label)| (label.to_string(), field(*kind)))
                        .collect(),
                }
            })
            .collect())
    }

    fn start_live(&mut self, requests: &[StreamRequest]) -> Result<()> {
        let mut config = Config::new();
        for req in requests {
            config
                .enable_stream(
                    stream_kind(req.stream),
                    None,
                    req.width as usize,
                    req.height as usize,
                    stream_format(req.format),
                    req.fps as usize,
                )
                .map_err(|e| Error::Device(format!("{:?} stream rejected: {e}", req.stream)))?;
        }
        self.start(config)
    }

    fn start_recording(&mut self, path: &Path) -> Result<()> {
        let file = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|e| Error::Configuration(format!("recording path: {e}")))?;
        let mut config = Config::new();
        config
            .enable_device_from_file(&file)
            .map_err(|e| Error::Device(format!("{} could not be opened: {e}", path.display())))?;
        self.start(config)
    }

    fn depth_intrinsics(&self) -> Result<CameraParameters> {
        let active = self.active()?;
        let profile = active
            .profile()
            .streams()
            .iter()
            .find(|s| s.kind() == Rs2StreamKind::Depth)
            .ok_or_else(|| Error::Device("no depth stream in pipeline profile".to_string()))?;
        let i = profile
            .intrinsics()
            .map_err(|e| Error::Device(format!("depth intrinsics unavailable: {e}")))?;
        CameraParameters::new(
            i.width() as u32,
            i.height() as u32,
            i.fx(),
            i.fy(),
            i.ppx(),
            i.ppy(),
        )
        .map_err(|e| Error::Device(format!("device reported invalid intrinsics: {e}")))
    }

    fn depth_scale(&self) -> Result<f32> {
        let active = self.active()?;
        active
            .profile()
            .device()
            .sensors()
            .iter()
            .find_map(|s| s.get_option(Rs2Option::DepthUnits))
            .ok_or_else(|| Error::Device("no sensor reports depth units".to_string()))
    }

    fn wait_for_frames(&mut self) -> Result<FramePair<'_>> {
        let State::Active(active) = &mut self.state else {
            return Err(Error::Acquisition("pipeline not started".to_string()));
        };
        let frames = active
            .wait(None)
            .map_err(|e| Error::Acquisition(format!("frame wait failed: {e}")))?;

        let depth = frames
            .frames_of_type::<DepthFrame>()
            .into_iter()
            .next()
            .ok_or_else(|| Error::Acquisition("frameset has no depth frame".to_string()))?;
        let color = frames
            .frames_of_type::<ColorFrame>()
            .into_iter()
            .next()
            .ok_or_else(|| Error::Acquisition("frameset has no color frame".to_string()))?;

        let (dw, dh) = (depth.width(), depth.height());
        self.depth_buf.clear();
        for row in 0..dh {
            for col in 0..dw {
                let d = match depth.get(col, row) {
                    Some(PixelKind::Z16 { depth }) => *depth,
                    _ => 0,
                };
                self.depth_buf.push(d);
            }
        }

        let (cw, ch) = (color.width(), color.height());
        let mut color_format = PixelFormat::Rgb8;
        self.color_buf.clear();
        for row in 0..ch {
            for col in 0..cw {
                match color.get(col, row) {
                    Some(PixelKind::Rgb8 { r, g, b }) => {
                        self.color_buf.extend_from_slice(&[*r, *g, *b]);
                    }
                    Some(PixelKind::Bgr8 { b, g, r }) => {
                        color_format = PixelFormat::Bgr8;
                        self.color_buf.extend_from_slice(&[*b, *g, *r]);
                    }
                    _ => {
                        return Err(Error::Acquisition(
                            "color frame is not 8-bit RGB/BGR".to_string(),
                        ))
                    }
                }
            }
        }
        debug!(dw, dh, cw, ch, "realsense frameset copied");

        Ok(FramePair {
            depth: RawFrame {
                width: dw as u32,
                height: dh as u32,
                valid: true,
                data: Some(&self.depth_buf),
            },
            color: RawFrame {
                width: cw as u32,
                height: ch as u32,
                valid: true,
                data: Some(&self.color_buf),
            },
            color_format,
        })
    }

    fn stop(&mut self) {
        if let State::Active(active) = std::mem::replace(&mut self.state, State::Stopped) {
            self.state = State::Idle(active.stop());
        }
    }
}
