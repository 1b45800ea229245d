use crate::{Error, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;

/// Byte order of a three-channel 8-bit color buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PixelFormat {
    Bgr8,
    Rgb8,
}

/// Pinhole intrinsics plus the resolution they apply to.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraParameters {
    pub image_width: u32,
    pub image_height: u32,
    pub focal_x: f32,
    pub focal_y: f32,
    pub principal_x: f32,
    pub principal_y: f32,
}

impl CameraParameters {
    pub fn new(
        image_width: u32,
        image_height: u32,
        focal_x: f32,
        focal_y: f32,
        principal_x: f32,
        principal_y: f32,
    ) -> Result<Self> {
        if image_width == 0 || image_height == 0 {
            return Err(Error::Configuration(format!(
                "resolution must be positive, got {image_width}x{image_height}"
            )));
        }
        if !(focal_x.is_finite() && focal_y.is_finite() && focal_x > 0.0 && focal_y > 0.0) {
            return Err(Error::Configuration(format!(
                "focal lengths must be positive, got {focal_x}/{focal_y}"
            )));
        }
        if !(principal_x.is_finite() && principal_y.is_finite()) {
            return Err(Error::Configuration(
                "principal point must be finite".to_string(),
            ));
        }
        Ok(Self {
            image_width,
            image_height,
            focal_x,
            focal_y,
            principal_x,
            principal_y,
        })
    }

    /// Parse the plain-text record `width height focal_x focal_y principal_x principal_y`.
    pub fn parse(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(Error::Configuration(format!(
                "expected 6 calibration fields, found {}",
                fields.len()
            )));
        }
        Self::new(
            parse_field(fields[0], "image_width")?,
            parse_field(fields[1], "image_height")?,
            parse_field(fields[2], "focal_x")?,
            parse_field(fields[3], "focal_y")?,
            parse_field(fields[4], "principal_x")?,
            parse_field(fields[5], "principal_y")?,
        )
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.image_width, self.image_height)
    }
}

fn parse_field<T: FromStr>(raw: &str, name: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Configuration(format!("invalid {name}: {raw:?}")))
}

/// Row-major depth image in millimeters; 0 means no return.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthMap {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl DepthMap {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(Error::Acquisition(format!(
                "depth buffer holds {} values, expected {expected} for {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize],
        }
    }

    /// Convert native integer depth units into millimeters.
    pub fn from_native(width: u32, height: u32, native: &[u16], mm_per_unit: f32) -> Result<Self> {
        let data = native.iter().map(|&d| d as f32 * mm_per_unit).collect();
        Self::new(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Smallest and largest valid (positive, finite) depth.
    pub fn valid_range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|d| d.is_finite() && *d > 0.0)
            .fold(None, |acc, d| match acc {
                None => Some((d, d)),
                Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
            })
    }

    /// Mirror around the vertical axis.
    pub fn mirror_horizontal(&mut self) {
        flip_rows(&mut self.data, self.width as usize, 1);
    }
}

/// Row-major RGB image, three bytes per pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColorMap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ColorMap {
    /// Wrap an interleaved buffer, reordering to RGB when it arrives as BGR.
    pub fn from_raw(width: u32, height: u32, mut data: Vec<u8>, format: PixelFormat) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(Error::Acquisition(format!(
                "color buffer holds {} bytes, expected {expected} for {width}x{height}",
                data.len()
            )));
        }
        if format == PixelFormat::Bgr8 {
            for px in data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            image::Rgb(self.pixel(x, y).unwrap_or([0, 0, 0]))
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        let px = self.data.get(idx..idx + 3)?;
        Some([px[0], px[1], px[2]])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn mirror_horizontal(&mut self) {
        flip_rows(&mut self.data, self.width as usize, 3);
    }
}

fn flip_rows<T>(data: &mut [T], width: usize, channels: usize) {
    let stride = width * channels;
    if stride == 0 {
        return;
    }
    for row in data.chunks_exact_mut(stride) {
        for x in 0..width / 2 {
            let mirror = width - 1 - x;
            for c in 0..channels {
                row.swap(x * channels + c, mirror * channels + c);
            }
        }
    }
}

/// One acquisition instant: depth and color at the same resolution.
#[derive(Clone, Debug)]
pub struct InputFrame {
    depth_map: DepthMap,
    color_map: ColorMap,
    ts: Option<OffsetDateTime>,
}

impl InputFrame {
    pub fn new(depth_map: DepthMap, color_map: ColorMap) -> Result<Self> {
        if depth_map.dimensions() != color_map.dimensions() {
            let (dw, dh) = depth_map.dimensions();
            let (cw, ch) = color_map.dimensions();
            return Err(Error::Acquisition(format!(
                "depth is {dw}x{dh} but color is {cw}x{ch}"
            )));
        }
        Ok(Self {
            depth_map,
            color_map,
            ts: Some(OffsetDateTime::now_utc()),
        })
    }

    pub fn depth_map(&self) -> &DepthMap {
        &self.depth_map
    }

    pub fn color_map(&self) -> &ColorMap {
        &self.color_map
    }

    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        self.ts
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.depth_map.dimensions()
    }

    /// Fail unless the frame has the resolution announced by `params`.
    pub fn ensure_resolution(&self, params: &CameraParameters) -> Result<()> {
        if self.dimensions() != params.resolution() {
            let (w, h) = self.dimensions();
            return Err(Error::Acquisition(format!(
                "frame is {w}x{h} but camera reports {}x{}",
                params.image_width, params.image_height
            )));
        }
        Ok(())
    }
}

/// Identification and metadata for an enumerated device.
#[derive(Clone, Debug, Default)]
pub struct DeviceInfo {
    pub name: String,
    /// Metadata fields; `None` marks a field the device does not report.
    pub details: Vec<(String, Option<String>)>,
}

/// A frame buffer lent by a vendor runtime. It is only valid until the next
/// read on the same stream, so callers copy what they need out of it.
#[derive(Clone, Copy, Debug)]
pub struct RawFrame<'a, T> {
    pub width: u32,
    pub height: u32,
    pub valid: bool,
    pub data: Option<&'a [T]>,
}

impl<'a, T> RawFrame<'a, T> {
    /// The pixel buffer, provided the runtime marked the frame valid and
    /// attached enough data for `channels` values per pixel.
    pub fn pixels(&self, stream: &str, channels: usize) -> Result<&'a [T]> {
        if !self.valid {
            return Err(Error::Acquisition(format!("{stream} frame reported invalid")));
        }
        let data = self
            .data
            .ok_or_else(|| Error::Acquisition(format!("{stream} frame has no data buffer")))?;
        let expected = self.width as usize * self.height as usize * channels;
        if expected == 0 || data.len() < expected {
            return Err(Error::Acquisition(format!(
                "{stream} frame buffer holds {} values, expected {expected}",
                data.len()
            )));
        }
        Ok(&data[..expected])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_calibration_record() {
        let p = CameraParameters::parse("640 480\n525.0 525.0\n319.5 239.5\n").unwrap();
        assert_eq!(p.resolution(), (640, 480));
        assert_eq!(p.focal_x, 525.0);
        assert_eq!(p.principal_y, 239.5);
    }

    #[test]
    fn parse_rejects_malformed_records() {
        assert!(matches!(
            CameraParameters::parse("640 480 525"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            CameraParameters::parse("640 abc 525 525 319.5 239.5"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            CameraParameters::parse("0 480 525 525 319.5 239.5"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn native_depth_conversion_scales_units() {
        let d = DepthMap::from_native(2, 1, &[1000, 250], 0.5).unwrap();
        assert_eq!(d.as_slice(), &[500.0, 125.0]);
    }

    #[test]
    fn bgr_input_is_reordered() {
        let c = ColorMap::from_raw(1, 1, vec![1, 2, 3], PixelFormat::Bgr8).unwrap();
        assert_eq!(c.pixel(0, 0), Some([3, 2, 1]));
    }

    #[test]
    fn mirroring_keeps_depth_and_color_registered() {
        let mut depth = DepthMap::new(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let raw: Vec<u8> = (0..18).collect();
        let mut color = ColorMap::from_raw(3, 2, raw, PixelFormat::Rgb8).unwrap();
        let before: Vec<_> = (0..3).map(|x| (depth.get(x, 1), color.pixel(x, 1))).collect();

        depth.mirror_horizontal();
        color.mirror_horizontal();

        for x in 0..3 {
            assert_eq!((depth.get(x, 1), color.pixel(x, 1)), before[2 - x as usize]);
        }
        assert_eq!(color.pixel(0, 0), Some([6, 7, 8]));
    }

    #[test]
    fn frame_rejects_mismatched_dimensions() {
        let depth = DepthMap::zeros(4, 4);
        let color = ColorMap::filled(4, 3, [0, 0, 0]);
        assert!(matches!(
            InputFrame::new(depth, color),
            Err(Error::Acquisition(_))
        ));
    }

    #[test]
    fn raw_frame_validation() {
        let buf = [1u16, 2, 3, 4];
        let ok = RawFrame {
            width: 2,
            height: 2,
            valid: true,
            data: Some(&buf[..]),
        };
        assert_eq!(ok.pixels("depth", 1).unwrap(), &buf);
        let invalid = RawFrame { valid: false, ..ok };
        assert!(invalid.pixels("depth", 1).is_err());
        let null: RawFrame<'_, u16> = RawFrame { data: None, ..ok };
        assert!(null.pixels("depth", 1).is_err());
    }
}
