//! 图片序列视频源 (目录中的图片按文件名排序)
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::RgbImage;

use super::{FrameReader, VideoInfo};

const EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// 图片序列的名义帧率
pub const SEQUENCE_FPS: f64 = 30.0;

pub struct ImageSequence {
    files: Vec<PathBuf>,
    width: u32,
    height: u32,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("read directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        files.sort();

        let Some(first) = files.first() else {
            bail!("no images found in {}", dir.display());
        };
        let (width, height) = image::image_dimensions(first)
            .with_context(|| format!("read image header {}", first.display()))?;

        Ok(Self {
            files,
            width,
            height,
        })
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameReader for ImageSequence {
    fn read(&mut self, index: u64) -> Result<Option<RgbImage>> {
        let Some(path) = self.files.get(index as usize) else {
            return Ok(None);
        };
        let image = image::open(path).with_context(|| format!("decode {}", path.display()))?;
        Ok(Some(image.to_rgb8()))
    }

    fn rewind(&mut self) -> Result<()> {
        Ok(())
    }

    fn info(&self) -> VideoInfo {
        VideoInfo {
            fps: SEQUENCE_FPS,
            frame_count: self.files.len() as u64,
            width: self.width,
            height: self.height,
        }
    }
}
