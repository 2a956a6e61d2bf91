// src/video_processor.rs
//
// Frame sources. The camera path goes through OpenCV; the image path
// replays a directory of stills, which is what tests and offline
// reviews use.

use crate::config::{SourceConfig, SourceKind};
use crate::types::Frame;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

pub trait FrameSource {
    /// `Ok(None)` marks the end of the stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying device. Called once when the driver stops.
    fn close(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Open the configured source. Failing to open is fatal for startup.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource + Send>> {
    match config.kind {
        SourceKind::Images => Ok(Box::new(ImageSequenceSource::open(&config.image_dir)?)),
        SourceKind::Camera => open_camera(&config.camera),
    }
}

#[cfg(feature = "opencv")]
fn open_camera(camera: &str) -> Result<Box<dyn FrameSource + Send>> {
    Ok(Box::new(camera::CameraSource::open(camera)?))
}

#[cfg(not(feature = "opencv"))]
fn open_camera(camera: &str) -> Result<Box<dyn FrameSource + Send>> {
    anyhow::bail!(
        "cannot open camera source {:?}: built without the `opencv` feature",
        camera
    )
}

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Replays every image under a directory in path order.
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    position: usize,
    /// Timestamps advance as if the stills were captured at this rate
    fps: f64,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            anyhow::bail!("image source {} is not a directory", dir.display());
        }

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| has_image_extension(p))
            .collect();
        files.sort();

        info!("Found {} image(s) in {}", files.len(), dir.display());

        Ok(Self {
            files,
            position: 0,
            fps: 30.0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.position) else {
            return Ok(None);
        };

        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();

        let index = self.position as u64;
        self.position += 1;

        let (width, height) = image.dimensions();
        Ok(Some(Frame::new(
            image.into_raw(),
            width as usize,
            height as usize,
            index,
            index as f64 / self.fps * 1000.0,
        )))
    }

    fn close(&mut self) {
        self.position = self.files.len();
    }
}

#[cfg(feature = "opencv")]
pub mod camera {
    use super::FrameSource;
    use crate::types::Frame;
    use anyhow::Result;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
    };
    use tracing::info;

    pub struct CameraSource {
        cap: VideoCapture,
        fps: f64,
        current_frame: u64,
    }

    impl CameraSource {
        /// `camera` is a device index ("0") or anything OpenCV can open.
        pub fn open(camera: &str) -> Result<Self> {
            info!("Connecting to camera source: {}", camera);

            let cap = match camera.parse::<i32>() {
                Ok(index) => VideoCapture::new(index, videoio::CAP_ANY)?,
                Err(_) => VideoCapture::from_file(camera, videoio::CAP_ANY)?,
            };

            if !cap.is_opened()? {
                anyhow::bail!("could not open video stream from source {}", camera);
            }

            let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
            let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
            let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

            info!("Video properties: {}x{} @ {:.1} FPS", width, height, fps);

            Ok(Self {
                cap,
                fps: if fps > 0.0 { fps } else { 30.0 },
                current_frame: 0,
            })
        }
    }

    impl FrameSource for CameraSource {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            let mut mat = Mat::default();

            if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
                return Ok(None);
            }

            let index = self.current_frame;
            self.current_frame += 1;
            let timestamp_ms = (index as f64 / self.fps) * 1000.0;

            let mut rgb_mat = Mat::default();
            imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

            let data = rgb_mat.data_bytes()?.to_vec();

            Ok(Some(Frame::new(
                data,
                rgb_mat.cols() as usize,
                rgb_mat.rows() as usize,
                index,
                timestamp_ms,
            )))
        }

        fn close(&mut self) {
            if let Err(e) = VideoCaptureTrait::release(&mut self.cap) {
                tracing::warn!("Failed to release camera: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_image(dir: &Path, name: &str, shade: u8) {
        let img = RgbImage::from_pixel(4, 2, Rgb([shade, shade, shade]));
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn test_images_replay_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "b.png", 20);
        write_image(dir.path(), "a.png", 10);
        write_image(dir.path(), "c.PNG", 30);
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 3);

        let mut shades = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!((frame.width, frame.height), (4, 2));
            assert_eq!(frame.data.len(), 4 * 2 * 3);
            shades.push(frame.data[0]);
        }
        assert_eq!(shades, vec![10, 20, 30]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_close_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png", 1);
        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        source.close();
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_image_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"not a jpeg").unwrap();
        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn test_missing_directory_fails_open() {
        assert!(ImageSequenceSource::open("/definitely/not/here").is_err());
    }
}
