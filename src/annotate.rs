//! 检测框绘制与显示缩放

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use fast_image_resize as fr;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detection::palette::class_color;
use crate::detection::DetectionBatch;

/// 框线宽度 (像素)
const BOX_THICKNESS: i32 = 3;
const LABEL_SCALE: f32 = 18.0;
const LABEL_PADDING: u32 = 4;

/// 未配置字体时依次尝试的系统字体
const FALLBACK_FONTS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    /// 加载标签字体; 找不到字体时只画框不写字
    pub fn new(font_path: Option<&str>) -> Self {
        let font = match font_path {
            Some(path) => load_font(Path::new(path)),
            None => FALLBACK_FONTS
                .iter()
                .map(Path::new)
                .filter(|p| p.is_file())
                .find_map(load_font),
        };
        if font.is_none() {
            log::warn!("⚠️  未找到可用字体, 检测框将不显示文字标签");
        }
        Self { font }
    }

    /// 不带字体
    pub fn without_labels() -> Self {
        Self { font: None }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 在图片副本上绘制全部检测框
    pub fn draw(&self, image: &RgbImage, batch: &DetectionBatch) -> RgbImage {
        let mut canvas = image.clone();
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return canvas;
        }

        for det in batch {
            let color = Rgb(class_color(&det.label));
            let bbox = det.bbox.clamp(width as f32, height as f32);
            let x1 = bbox.x1.round() as i32;
            let y1 = bbox.y1.round() as i32;
            let x2 = bbox.x2.round() as i32;
            let y2 = bbox.y2.round() as i32;

            for inset in 0..BOX_THICKNESS {
                let w = x2 - x1 - 2 * inset;
                let h = y2 - y1 - 2 * inset;
                if w <= 0 || h <= 0 {
                    break;
                }
                draw_hollow_rect_mut(
                    &mut canvas,
                    Rect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32),
                    color,
                );
            }

            if let Some(font) = &self.font {
                let text = format!("{}: {:.2}", det.label, det.confidence);
                let scale = PxScale::from(LABEL_SCALE);
                let (tw, th) = text_size(scale, font, &text);
                let bg_w = tw + 2 * LABEL_PADDING;
                let bg_h = th + 2 * LABEL_PADDING;
                // 上方放不下时画在框内
                let bg_y = if y1 >= bg_h as i32 { y1 - bg_h as i32 } else { y1 };

                draw_filled_rect_mut(&mut canvas, Rect::at(x1, bg_y).of_size(bg_w, bg_h), color);
                draw_text_mut(
                    &mut canvas,
                    Rgb([255, 255, 255]),
                    x1 + LABEL_PADDING as i32,
                    bg_y + LABEL_PADDING as i32,
                    scale,
                    font,
                    &text,
                );
            }
        }
        canvas
    }
}

fn load_font(path: &Path) -> Option<FontArc> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("⚠️  读取字体失败 {}: {}", path.display(), e);
            return None;
        }
    };
    match FontArc::try_from_vec(bytes) {
        Ok(font) => {
            log::info!("🔤 标签字体: {}", path.display());
            Some(font)
        }
        Err(e) => {
            log::warn!("⚠️  字体无效 {}: {}", path.display(), e);
            None
        }
    }
}

/// 等比缩小到 max_w × max_h 以内; 本来就更小时原样返回
pub fn resize_for_display(image: RgbImage, max_w: u32, max_h: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || (w <= max_w && h <= max_h) {
        return image;
    }

    let scale = (max_w as f64 / w as f64).min(max_h as f64 / h as f64);
    let nw = ((w as f64 * scale).round() as u32).clamp(1, max_w.max(1));
    let nh = ((h as f64 * scale).round() as u32).clamp(1, max_h.max(1));

    match fast_resize(&image, nw, nh) {
        Ok(resized) => resized,
        Err(e) => {
            log::warn!("⚠️  fast_image_resize 失败, 使用 image 缩放: {:#}", e);
            image::imageops::resize(&image, nw, nh, image::imageops::FilterType::Triangle)
        }
    }
}

fn fast_resize(image: &RgbImage, nw: u32, nh: u32) -> anyhow::Result<RgbImage> {
    let src = fr::images::ImageRef::new(
        image.width(),
        image.height(),
        image.as_raw(),
        fr::PixelType::U8x3,
    )?;
    let mut dst = fr::images::Image::new(nw, nh, fr::PixelType::U8x3);
    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
    fr::Resizer::new().resize(&src, &mut dst, Some(&options))?;

    RgbImage::from_raw(nw, nh, dst.into_vec())
        .ok_or_else(|| anyhow::anyhow!("resized buffer has the wrong length"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BBox, Detection};

    #[test]
    fn test_draw_box_in_class_color() {
        let image = RgbImage::new(64, 64);
        let batch = DetectionBatch::new(
            vec![Detection::new(BBox::new(10.0, 10.0, 50.0, 40.0), 0, "person", 0.9)],
            (64, 64),
        );
        let annotated = Annotator::without_labels().draw(&image, &batch);

        assert_eq!(annotated.get_pixel(10, 25), &Rgb([0, 0, 255]));
        assert_eq!(annotated.get_pixel(12, 25), &Rgb([0, 0, 255]));
        assert_eq!(annotated.get_pixel(30, 25), &Rgb([0, 0, 0]));
        // 原图不变
        assert_eq!(image.get_pixel(10, 25), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_unknown_class_is_white() {
        let image = RgbImage::new(32, 32);
        let batch = DetectionBatch::new(
            vec![Detection::new(BBox::new(0.0, 0.0, 20.0, 20.0), 7, "tank", 0.5)],
            (32, 32),
        );
        let annotated = Annotator::without_labels().draw(&image, &batch);
        assert_eq!(annotated.get_pixel(0, 10), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_resize_keeps_small_images() {
        let image = RgbImage::new(320, 240);
        let out = resize_for_display(image, 800, 600);
        assert_eq!(out.dimensions(), (320, 240));
    }

    #[test]
    fn test_resize_preserves_aspect() {
        let image = RgbImage::new(1600, 600);
        let out = resize_for_display(image, 800, 600);
        assert_eq!(out.dimensions(), (800, 300));

        let tall = RgbImage::new(400, 1200);
        assert_eq!(resize_for_display(tall, 800, 600).dimensions(), (200, 600));
    }

    #[test]
    fn test_missing_font_path() {
        let annotator = Annotator::new(Some("/nonexistent/font.ttf"));
        assert!(!annotator.has_font());
    }
}
