//! 视频输入 (Frame Source)
//!
//! 按路径选择后端:
//! - `stub://N?...`: 合成视频源 (测试/演示)
//! - 目录:           图片序列
//! - 其他文件:       FFmpeg 解码 (需要 `ffmpeg` feature)
//!
//! 解码器句柄只在 `VideoSource` 内部, 不对外暴露。
use std::path::Path;

use anyhow::Result as AnyResult;
use image::RgbImage;

use crate::error::{describe, DetectError, Result};

#[cfg(feature = "ffmpeg")]
pub mod container;
pub mod sequence;
pub mod synthetic;

pub use sequence::ImageSequence;
pub use synthetic::SyntheticSource;

/// 视频元数据; 未打开时全部为0
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VideoInfo {
    pub fps: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
}

/// 一帧画面, `index` 为从0开始的解码序号
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub index: u64,
    pub image: RgbImage,
}

/// 解码后端
pub trait FrameReader: Send {
    /// 读取第 index 帧 (严格按顺序调用); `Ok(None)` 表示结束
    fn read(&mut self, index: u64) -> AnyResult<Option<RgbImage>>;

    /// 回到第0帧
    fn rewind(&mut self) -> AnyResult<()>;

    fn info(&self) -> VideoInfo;
}

/// 已打开的视频源
pub struct VideoSource {
    path: String,
    reader: Option<Box<dyn FrameReader>>,
    position: u64,
}

impl VideoSource {
    pub fn open(path: &str) -> Result<Self> {
        let reader = open_reader(path).map_err(|e| DetectError::VideoOpen {
            path: path.to_string(),
            reason: describe(&e),
        })?;
        let info = reader.info();
        log::info!(
            "🎬 视频已打开: {} ({}x{}, {:.1}fps, {}帧)",
            path,
            info.width,
            info.height,
            info.fps,
            info.frame_count
        );
        Ok(Self {
            path: path.to_string(),
            reader: Some(reader),
            position: 0,
        })
    }

    /// 读取下一帧; 结束、已关闭或解码失败时返回 None
    pub fn read_next(&mut self) -> Option<VideoFrame> {
        let reader = self.reader.as_mut()?;
        match reader.read(self.position) {
            Ok(Some(image)) => {
                let frame = VideoFrame {
                    index: self.position,
                    image,
                };
                self.position += 1;
                Some(frame)
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!(
                    "⚠️  解码失败 ({} 第{}帧), 视为结束: {}",
                    self.path,
                    self.position,
                    describe(&e)
                );
                None
            }
        }
    }

    /// 回到第0帧; 回退失败时关闭视频源
    pub fn reset(&mut self) {
        self.position = 0;
        if let Some(reader) = self.reader.as_mut() {
            if let Err(e) = reader.rewind() {
                log::warn!("⚠️  视频回退失败, 关闭 {}: {}", self.path, describe(&e));
                self.reader = None;
            }
        }
    }

    pub fn info(&self) -> VideoInfo {
        self.reader
            .as_ref()
            .map(|r| r.info())
            .unwrap_or_default()
    }

    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            log::debug!("视频源已关闭: {}", self.path);
        }
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// 下一次 `read_next` 返回的帧序号
    pub fn position(&self) -> u64 {
        self.position
    }
}

fn open_reader(path: &str) -> AnyResult<Box<dyn FrameReader>> {
    if let Some(params) = path.strip_prefix(synthetic::SCHEME) {
        return Ok(Box::new(SyntheticSource::parse(params)?));
    }

    let fs_path = Path::new(path);
    if !fs_path.exists() {
        anyhow::bail!("no such file or directory");
    }
    if fs_path.is_dir() {
        return Ok(Box::new(ImageSequence::open(fs_path)?));
    }
    open_container(fs_path)
}

#[cfg(feature = "ffmpeg")]
fn open_container(path: &Path) -> AnyResult<Box<dyn FrameReader>> {
    Ok(Box::new(container::FfmpegSource::open(path)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_container(_path: &Path) -> AnyResult<Box<dyn FrameReader>> {
    anyhow::bail!("video decoding requires the `ffmpeg` feature (rebuild with --features ffmpeg)")
}
