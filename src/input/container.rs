//! FFmpeg 视频文件解码 (mp4/avi/mov/mkv/wmv ...)
//!
//! 按需拉取: 每次 `read` 解码一帧并转为 RGB24。
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::{FrameReader, VideoInfo};

pub struct FfmpegSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    /// 首帧时创建, 源格式或尺寸变化时重建
    scaler: Option<ffmpeg::software::scaling::Context>,
    eof_sent: bool,
    info: VideoInfo,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("open {} with ffmpeg", path.display()))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = stream.index();

        let rate = stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 && rate.numerator() > 0 {
            f64::from(rate)
        } else {
            0.0
        };
        let frame_count = stream.frames().max(0) as u64;

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let info = VideoInfo {
            fps,
            frame_count,
            width: decoder.width(),
            height: decoder.height(),
        };

        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index,
            decoder,
            scaler: None,
            eof_sent: false,
            info,
        })
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        let index = self.stream_index;
        self.input
            .packets()
            .find(|(stream, _)| stream.index() == index)
            .map(|(_, packet)| packet)
    }

    fn scaler_for(
        &mut self,
        decoded: &ffmpeg::frame::Video,
    ) -> Result<&mut ffmpeg::software::scaling::Context> {
        let stale = self.scaler.as_ref().map_or(true, |scaler| {
            let input = scaler.input();
            (input.format, input.width, input.height)
                != (decoded.format(), decoded.width(), decoded.height())
        });
        if stale {
            let scaler = ffmpeg::software::scaling::context::Context::get(
                decoded.format(),
                decoded.width(),
                decoded.height(),
                ffmpeg::util::format::pixel::Pixel::RGB24,
                decoded.width(),
                decoded.height(),
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .context("create ffmpeg scaler")?;
            log::debug!(
                "ffmpeg scaler: {:?} {}x{} → RGB24",
                decoded.format(),
                decoded.width(),
                decoded.height()
            );
            self.scaler = Some(scaler);
        }
        self.scaler
            .as_mut()
            .ok_or_else(|| anyhow!("ffmpeg scaler missing"))
    }

    fn to_rgb(&mut self, decoded: &ffmpeg::frame::Video) -> Result<RgbImage> {
        let scaler = self.scaler_for(decoded)?;
        let mut rgb = ffmpeg::frame::Video::empty();
        scaler.run(decoded, &mut rgb).context("scale frame to RGB")?;

        let (width, height) = (rgb.width(), rgb.height());
        let row_bytes = width as usize * 3;
        let stride = rgb.stride(0);
        let data = rgb.data(0);

        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .context("ffmpeg frame row is out of bounds")?,
            );
        }
        RgbImage::from_raw(width, height, pixels).context("build RGB image")
    }
}

impl FrameReader for FfmpegSource {
    fn read(&mut self, _index: u64) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.to_rgb(&decoded).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }
            match self.next_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }

    /// 重新打开文件回到第0帧 (比 seek 更可靠)
    fn rewind(&mut self) -> Result<()> {
        *self = Self::open(&self.path)?;
        Ok(())
    }

    fn info(&self) -> VideoInfo {
        self.info
    }
}
