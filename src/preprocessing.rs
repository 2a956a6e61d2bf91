// src/preprocessing.rs

use crate::types::Frame;
use anyhow::Result;

/// Turn a frame into the classifier's input tensor: square RGB resize,
/// scaled to [0, 1], NHWC layout with a batch of one.
pub fn preprocess(frame: &Frame, size: usize) -> Result<Vec<f32>> {
    if frame.width == 0 || frame.height == 0 {
        anyhow::bail!("frame {} is empty", frame.index);
    }
    if frame.data.len() < frame.width * frame.height * 3 {
        anyhow::bail!(
            "frame {} has {} bytes, expected {}x{}x3",
            frame.index,
            frame.data.len(),
            frame.width,
            frame.height
        );
    }

    let resized = resize_bilinear(&frame.data, frame.width, frame.height, size, size);
    Ok(resized.iter().map(|&p| p as f32 / 255.0).collect())
}

/// Bilinear image resize
fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];

    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;

            let sx0 = (sx.floor() as usize).min(src_w - 1);
            let sy0 = (sy.floor() as usize).min(src_h - 1);
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);

            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape_and_range() {
        let frame = Frame::new(vec![255u8; 640 * 480 * 3], 640, 480, 0, 0.0);
        let input = preprocess(&frame, 128).unwrap();
        assert_eq!(input.len(), 128 * 128 * 3);
        assert!(input.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_preprocess_rejects_short_buffer() {
        let frame = Frame::new(vec![0u8; 12], 640, 480, 9, 0.0);
        assert!(preprocess(&frame, 128).is_err());
    }

    #[test]
    fn test_resize() {
        let src = vec![255u8; 100 * 100 * 3];
        let dst = resize_bilinear(&src, 100, 100, 50, 50);
        assert_eq!(dst.len(), 50 * 50 * 3);
    }

    #[test]
    fn test_upscale_single_pixel() {
        let dst = resize_bilinear(&[10, 20, 30], 1, 1, 4, 4);
        assert_eq!(&dst[..3], &[10, 20, 30]);
        assert_eq!(&dst[dst.len() - 3..], &[10, 20, 30]);
    }
}
