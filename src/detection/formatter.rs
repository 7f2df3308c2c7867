//! 检测结果格式化 (Detection Result Formatter)
//!
//! 纯函数: DetectionBatch → 统计数据 / 结果面板文本

use super::palette::class_emoji;
use super::types::DetectionBatch;

/// 置信度统计
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfidenceStats {
    pub mean: f32,
    pub min: f32,
    pub max: f32,
}

/// 一批检测结果的聚合统计
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionStats {
    pub total: usize,
    /// 类别 → 数量, 按首次出现顺序
    pub class_counts: Vec<(String, usize)>,
    /// 空结果时为 None
    pub confidence: Option<ConfidenceStats>,
}

impl DetectionStats {
    pub fn count_of(&self, label: &str) -> usize {
        self.class_counts
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }
}

pub const NO_DETECTIONS_TEXT: &str =
    "🚫 No detections found.\n\nTry adjusting the confidence threshold or using a different image.";

pub const ZERO_TOTAL_TEXT: &str = "📊 Total Detections: 0";

pub fn stats(batch: &DetectionBatch) -> DetectionStats {
    if batch.is_empty() {
        return DetectionStats::default();
    }

    let mut class_counts: Vec<(String, usize)> = Vec::new();
    for det in batch {
        match class_counts.iter_mut().find(|(name, _)| *name == det.label) {
            Some((_, count)) => *count += 1,
            None => class_counts.push((det.label.clone(), 1)),
        }
    }

    // f64 累加
    let sum: f64 = batch.iter().map(|d| d.confidence as f64).sum();
    let min = batch
        .iter()
        .map(|d| d.confidence)
        .fold(f32::INFINITY, f32::min);
    let max = batch
        .iter()
        .map(|d| d.confidence)
        .fold(f32::NEG_INFINITY, f32::max);

    DetectionStats {
        total: batch.len(),
        class_counts,
        confidence: Some(ConfidenceStats {
            mean: (sum / batch.len() as f64) as f32,
            min,
            max,
        }),
    }
}

/// 逐条检测结果文本 (结果面板)
pub fn render_text(batch: &DetectionBatch) -> String {
    if batch.is_empty() {
        return NO_DETECTIONS_TEXT.to_string();
    }

    let mut text = format!("🎯 DETECTION RESULTS\n{}\n\n", "=".repeat(50));

    for (i, det) in batch.iter().enumerate() {
        let b = &det.bbox;
        text.push_str(&format!(
            "Detection #{:02} {}\n",
            i + 1,
            class_emoji(&det.label)
        ));
        text.push_str(&format!("├─ Class: {}\n", det.label));
        text.push_str(&format!(
            "├─ Confidence: {:.3} ({:.1}%)\n",
            det.confidence,
            det.confidence * 100.0
        ));
        text.push_str(&format!(
            "└─ BBox: ({:.0}, {:.0}) → ({:.0}, {:.0})\n",
            b.x1, b.y1, b.x2, b.y2
        ));
        text.push_str(&format!("\n{}\n\n", "─".repeat(40)));
    }

    text
}

/// 统计文本 (类别分布百分比 + 置信度)
pub fn render_stats_text(stats: &DetectionStats) -> String {
    if stats.total == 0 {
        return ZERO_TOTAL_TEXT.to_string();
    }

    let mut text = format!(
        "📊 Total Detections: {}\n\n📈 Class Distribution:\n",
        stats.total
    );

    for (label, count) in &stats.class_counts {
        let percentage = *count as f64 / stats.total as f64 * 100.0;
        text.push_str(&format!(
            "{} {}: {} ({:.1}%)\n",
            class_emoji(label),
            label,
            count,
            percentage
        ));
    }

    if let Some(conf) = &stats.confidence {
        text.push_str("\n🎯 Confidence Stats:\n");
        text.push_str(&format!("   Average: {:.3}\n", conf.mean));
        text.push_str(&format!("   Range: {:.3} - {:.3}", conf.min, conf.max));
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::{BBox, Detection};

    fn det(label: &str, confidence: f32) -> Detection {
        Detection::new(BBox::new(10.2, 20.7, 110.4, 220.5), 0, label, confidence)
    }

    fn batch(dets: Vec<Detection>) -> DetectionBatch {
        DetectionBatch::new(dets, (640, 480))
    }

    #[test]
    fn test_empty_batch() {
        let empty = batch(vec![]);
        let s = stats(&empty);
        assert_eq!(s.total, 0);
        assert!(s.class_counts.is_empty());
        assert!(s.confidence.is_none());
        assert_eq!(render_text(&empty), NO_DETECTIONS_TEXT);
        assert_eq!(render_stats_text(&s), ZERO_TOTAL_TEXT);
    }

    #[test]
    fn test_confidence_stats() {
        let b = batch(vec![det("person", 0.9), det("person", 0.5), det("car", 0.7)]);
        let conf = stats(&b).confidence.unwrap();
        assert!((conf.mean - 0.7).abs() < 1e-5);
        assert!((conf.min - 0.5).abs() < 1e-6);
        assert!((conf.max - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_class_counts_keep_first_seen_order() {
        let b = batch(vec![
            det("soldier", 0.8),
            det("civilian", 0.6),
            det("soldier", 0.7),
            det("folks", 0.9),
        ]);
        let s = stats(&b);
        let order: Vec<&str> = s.class_counts.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(order, vec!["soldier", "civilian", "folks"]);
        assert_eq!(s.count_of("soldier"), 2);
        assert_eq!(s.count_of("tank"), 0);
    }

    #[test]
    fn test_stats_text_percentages() {
        let b = batch(vec![det("A", 0.9), det("A", 0.8), det("B", 0.7), det("A", 0.6)]);
        let text = render_stats_text(&stats(&b));
        assert!(text.starts_with("📊 Total Detections: 4"));
        assert!(text.contains("A: 3 (75.0%)"));
        assert!(text.contains("B: 1 (25.0%)"));
        assert!(text.contains("Average: 0.750"));
        assert!(text.contains("Range: 0.600 - 0.900"));
    }

    #[test]
    fn test_render_text_blocks() {
        let b = batch(vec![det("person", 0.91234), det("tank", 0.5)]);
        let text = render_text(&b);
        assert!(text.starts_with("🎯 DETECTION RESULTS\n"));
        assert!(text.contains("Detection #01 🔵\n├─ Class: person\n"));
        assert!(text.contains("├─ Confidence: 0.912 (91.2%)\n"));
        // .5 向偶数取整
        assert!(text.contains("└─ BBox: (10, 21) → (110, 220)\n"));
        assert!(text.contains("Detection #02 ⚪\n├─ Class: tank\n"));
        // 第一条在第二条之前
        assert!(text.find("#01").unwrap() < text.find("#02").unwrap());
        assert_eq!(render_text(&b), text);
    }
}
