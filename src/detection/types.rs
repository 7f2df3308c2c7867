/// 检测数据结构定义
/// Data structures for detection results

// ========== 数据结构 ==========

/// 检测框 (像素坐标, 左上/右下角点)
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 从中心点+宽高构造
    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// x1<x2 且 y1<y2
    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    /// 裁剪到图像范围内
    pub fn clamp(&self, width: f32, height: f32) -> Self {
        Self {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
        }
    }

    pub fn intersection_area(&self, another: &BBox) -> f32 {
        let l = self.x1.max(another.x1);
        let r = self.x2.min(another.x2);
        let t = self.y1.max(another.y1);
        let b = self.y2.min(another.y2);
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    pub fn iou(&self, another: &BBox) -> f32 {
        let inter = self.intersection_area(another);
        if inter <= 0.0 {
            return 0.0;
        }
        inter / (self.area() + another.area() - inter)
    }
}

/// 单个检测目标
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BBox, class_id: usize, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            label: label.into(),
            confidence,
        }
    }
}

/// 一次推理的全部检测结果 (按后端输出顺序)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionBatch {
    pub detections: Vec<Detection>,
    /// 原图尺寸 (宽, 高)
    pub image_size: (u32, u32),
}

impl DetectionBatch {
    pub fn new(detections: Vec<Detection>, image_size: (u32, u32)) -> Self {
        Self {
            detections,
            image_size,
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    /// 聚合统计 (数量、类别分布、置信度)
    pub fn stats(&self) -> super::formatter::DetectionStats {
        super::formatter::stats(self)
    }
}

impl<'a> IntoIterator for &'a DetectionBatch {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(20.0, 20.0, 30.0, 30.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 15.0, 10.0);
        // 交集 50, 并集 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_cxcywh_and_clamp() {
        let b = BBox::from_cxcywh(5.0, 5.0, 20.0, 4.0).clamp(12.0, 12.0);
        assert_eq!(b, BBox::new(0.0, 3.0, 12.0, 7.0));
        assert!(b.is_valid());
        assert!(!BBox::new(3.0, 3.0, 3.0, 8.0).is_valid());
    }
}
