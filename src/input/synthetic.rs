//! 合成视频源: `stub://<frames>[?fail=<index>&size=<W>x<H>&fps=<F>]`
//!
//! 不依赖任何文件, 用于测试和演示。`fail` 模拟在指定帧解码失败。
use anyhow::{anyhow, bail, Context, Result};
use image::{Rgb, RgbImage};

use super::{FrameReader, VideoInfo};

pub const SCHEME: &str = "stub://";

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSource {
    frames: u64,
    fail_at: Option<u64>,
    width: u32,
    height: u32,
    fps: f64,
}

impl SyntheticSource {
    /// 解析 `stub://` 之后的部分
    pub fn parse(params: &str) -> Result<Self> {
        let (count, query) = match params.split_once('?') {
            Some((count, query)) => (count, Some(query)),
            None => (params, None),
        };

        let mut source = Self {
            frames: count
                .parse()
                .with_context(|| format!("invalid frame count '{}'", count))?,
            fail_at: None,
            width: 64,
            height: 48,
            fps: 30.0,
        };

        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid parameter '{}'", pair))?;
            match key {
                "fail" => {
                    source.fail_at = Some(
                        value
                            .parse()
                            .with_context(|| format!("invalid fail index '{}'", value))?,
                    )
                }
                "size" => {
                    let (w, h) = value
                        .split_once('x')
                        .ok_or_else(|| anyhow!("invalid size '{}'", value))?;
                    source.width = w.parse().with_context(|| format!("invalid width '{}'", w))?;
                    source.height = h.parse().with_context(|| format!("invalid height '{}'", h))?;
                }
                "fps" => {
                    source.fps = value
                        .parse()
                        .with_context(|| format!("invalid fps '{}'", value))?
                }
                other => bail!("unknown parameter '{}'", other),
            }
        }

        if source.width == 0 || source.height == 0 {
            bail!("frame size must be non-zero");
        }
        if !(source.fps.is_finite() && source.fps > 0.0) {
            bail!("fps must be positive");
        }
        Ok(source)
    }

    /// 第 index 帧: 随帧号平移的渐变
    fn render(&self, index: u64) -> RgbImage {
        let shift = (index % 256) as u32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                (y % 256) as u8,
                ((index * 10) % 256) as u8,
            ])
        })
    }
}

impl FrameReader for SyntheticSource {
    fn read(&mut self, index: u64) -> Result<Option<RgbImage>> {
        if self.fail_at == Some(index) {
            bail!("simulated decode failure at frame {}", index);
        }
        if index >= self.frames {
            return Ok(None);
        }
        Ok(Some(self.render(index)))
    }

    fn rewind(&mut self) -> Result<()> {
        Ok(())
    }

    fn info(&self) -> VideoInfo {
        VideoInfo {
            fps: self.fps,
            frame_count: self.frames,
            width: self.width,
            height: self.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let source = SyntheticSource::parse("10").unwrap();
        assert_eq!(source.frames, 10);
        assert_eq!(source.fail_at, None);
        assert_eq!((source.width, source.height), (64, 48));
    }

    #[test]
    fn test_parse_params() {
        let source = SyntheticSource::parse("5?fail=2&size=32x16&fps=25").unwrap();
        assert_eq!(source.fail_at, Some(2));
        assert_eq!((source.width, source.height), (32, 16));
        assert_eq!(source.fps, 25.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SyntheticSource::parse("abc").is_err());
        assert!(SyntheticSource::parse("3?size=0x10").is_err());
        assert!(SyntheticSource::parse("3?color=red").is_err());
        assert!(SyntheticSource::parse("3?fps=-1").is_err());
    }

    #[test]
    fn test_frames_differ() {
        let source = SyntheticSource::parse("3").unwrap();
        assert_ne!(source.render(0), source.render(1));
    }
}
