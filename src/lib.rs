// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod annotate; // 检测框绘制与显示缩放
pub mod app; // 应用控制器
pub mod config; // 应用配置
pub mod detection; // 检测结果与格式化
pub mod error; // 错误类型
pub mod input; // 视频输入
pub mod models; // 模型接口与 ONNX 实现
pub mod playback; // 视频播放引擎

pub use crate::app::{AppController, AppUpdate, DetectionView, Notice, NoticeLevel};
pub use crate::config::AppConfig;
pub use crate::detection::{BBox, Detection, DetectionBatch, DetectionStats};
pub use crate::error::{DetectError, Result};
pub use crate::input::{VideoFrame, VideoInfo, VideoSource};
pub use crate::models::{ModelManager, Thresholds};
pub use crate::playback::{PlaybackEngine, PlaybackFrame};
