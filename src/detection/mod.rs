/// 检测结果 (Detection Results)
///
/// - types:     检测框 / 检测目标 / 批量结果
/// - formatter: 统计与结果面板文本
/// - palette:   类别颜色与图标
pub mod formatter;
pub mod palette;
pub mod types;

pub use formatter::{render_stats_text, render_text, stats, ConfidenceStats, DetectionStats};
pub use types::{BBox, Detection, DetectionBatch};
