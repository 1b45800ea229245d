//! False-color renderings of depth and normal maps for display.

use crate::{ColorMap, DepthMap, Error, Result};

/// Turbo colormap, blue for near and red for far.
fn turbo(t: f32) -> [u8; 3] {
    let r = (0.13572138
        + t * (4.6153926 + t * (-42.66032 + t * (132.13108 + t * (-152.54825 + t * 59.28144)))))
        .clamp(0.0, 1.0);
    let g = (0.09140261
        + t * (2.19418 + t * (4.84296 + t * (-14.18503 + t * (4.27805 + t * 2.53377)))))
        .clamp(0.0, 1.0);
    let b = (0.1066733
        + t * (12.64194 + t * (-60.58204 + t * (109.99648 + t * (-82.52904 + t * 20.43388)))))
        .clamp(0.0, 1.0);
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

/// Color a depth map, normalized between its smallest and largest valid value.
/// Pixels without a return are black.
pub fn color_depth(depth: &DepthMap) -> ColorMap {
    let (width, height) = depth.dimensions();
    let Some((lo, hi)) = depth.valid_range() else {
        return ColorMap::filled(width, height, [0, 0, 0]);
    };
    let range = hi - lo;
    let mut rgb = Vec::with_capacity(depth.as_slice().len() * 3);
    for &d in depth.as_slice() {
        if !(d.is_finite() && d > 0.0) {
            rgb.extend_from_slice(&[0, 0, 0]);
            continue;
        }
        let t = if range > 0.0 { (d - lo) / range } else { 0.0 };
        rgb.extend_from_slice(&turbo(t));
    }
    ColorMap::from_rgb_image(
        image::RgbImage::from_raw(width, height, rgb)
            .unwrap_or_else(|| image::RgbImage::new(width, height)),
    )
}

/// Map unit normals to RGB via `(n + 1) / 2`. Zero-length or non-finite
/// normals are drawn white.
pub fn color_normal(normals: &[[f32; 3]], width: u32, height: u32) -> Result<ColorMap> {
    let expected = width as usize * height as usize;
    if normals.len() != expected {
        return Err(Error::Acquisition(format!(
            "normal map holds {} values, expected {expected} for {width}x{height}",
            normals.len()
        )));
    }
    let mut rgb = Vec::with_capacity(expected * 3);
    for n in normals {
        let valid = n.iter().all(|c| c.is_finite()) && n.iter().any(|c| *c != 0.0);
        if !valid {
            rgb.extend_from_slice(&[255, 255, 255]);
            continue;
        }
        for c in n {
            rgb.push((((c.clamp(-1.0, 1.0) + 1.0) * 0.5) * 255.0).round() as u8);
        }
    }
    ColorMap::from_raw(width, height, rgb, crate::PixelFormat::Rgb8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_is_normalized_between_extremes() {
        let d = DepthMap::new(3, 1, vec![0.0, 500.0, 1500.0]).unwrap();
        let c = color_depth(&d);
        assert_eq!(c.dimensions(), (3, 1));
        assert_eq!(c.pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(c.pixel(1, 0), Some(turbo(0.0)));
        assert_eq!(c.pixel(2, 0), Some(turbo(1.0)));
        assert!(turbo(1.0)[0] > turbo(0.0)[0]);
    }

    #[test]
    fn empty_depth_is_black() {
        let c = color_depth(&DepthMap::zeros(2, 2));
        assert!(c.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn normals_map_to_rgb() {
        let normals = [[0.0, 0.0, 1.0], [0.0, 0.0, 0.0], [f32::NAN, 0.0, 1.0], [-1.0, 1.0, 0.0]];
        let c = color_normal(&normals, 2, 2).unwrap();
        assert_eq!(c.pixel(0, 0), Some([128, 128, 255]));
        assert_eq!(c.pixel(1, 0), Some([255, 255, 255]));
        assert_eq!(c.pixel(0, 1), Some([255, 255, 255]));
        assert_eq!(c.pixel(1, 1), Some([0, 255, 128]));
        assert!(color_normal(&normals, 3, 3).is_err());
    }
}
