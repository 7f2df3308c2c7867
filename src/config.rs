//! 应用配置 - 通过JSON文件调整参数
//!
//! 配置对象在启动时显式传入 `AppController` 和界面, 不使用全局状态。
//! 只读取, 从不写盘。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{DetectError, Result};

/// 应用总配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    // === 窗口 ===
    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,
    pub theme: Theme,

    // === 检测参数 ===
    pub default_confidence: f32, // 默认置信度阈值
    pub default_iou: f32,        // 默认NMS IOU阈值
    pub threshold_min: f32,      // 滑块下限
    pub threshold_max: f32,      // 滑块上限
    pub threshold_steps: u32,    // 滑块步数

    // === 显示 ===
    pub max_display_width: u32,
    pub max_display_height: u32,
    pub font_path: Option<String>, // 标签字体 (TTF/OTF)

    pub playback: PlaybackSettings,
    pub model: ModelSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window_title: "Aerial Person Detection System".to_string(),
            window_width: 1400,
            window_height: 900,
            theme: Theme::Dark,
            default_confidence: 0.5,
            default_iou: 0.45,
            threshold_min: 0.1,
            threshold_max: 1.0,
            threshold_steps: 18,
            max_display_width: 800,
            max_display_height: 600,
            font_path: None,
            playback: PlaybackSettings::default(),
            model: ModelSettings::default(),
        }
    }
}

/// 界面主题
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Dark,
    Light,
}

/// 视频播放参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackSettings {
    pub fps: f64,               // 读帧节奏 (固定间隔, 不跟随源帧率)
    pub sample_stride: u64,     // 每N帧送检一帧
    pub buffer_capacity: usize, // 读帧线程 → 分发线程 队列容量
    pub poll_timeout_ms: u64,   // 分发线程等待超时
    pub join_timeout_ms: u64,   // cleanup 等待线程退出的上限
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            fps: 30.0,
            sample_stride: 3,
            buffer_capacity: 10,
            poll_timeout_ms: 100,
            join_timeout_ms: 1000,
        }
    }
}

impl PlaybackSettings {
    /// 读帧间隔; fps 非正或非有限时按默认 30fps
    pub fn frame_interval(&self) -> Duration {
        let fps = if self.fps.is_finite() && self.fps > 0.0 {
            self.fps
        } else {
            Self::default().fps
        };
        Duration::try_from_secs_f64(1.0 / fps).unwrap_or(Duration::MAX)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// 推理后端
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

/// ONNX 模型参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    pub input_size: u32, // 推理输入尺寸 (正方形)
    pub intra_threads: usize,
    pub execution_provider: ExecutionProvider,
    pub device_id: i32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            input_size: 640,
            intra_threads: 4,
            execution_provider: ExecutionProvider::Cpu,
            device_id: 0,
        }
    }
}

impl AppConfig {
    /// 从JSON文件加载配置, 缺省字段使用默认值
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| DetectError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| DetectError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        log::info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    /// 检查取值范围
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.default_confidence) {
            return Err(DetectError::Config(format!(
                "default_confidence {} is outside [0, 1]",
                self.default_confidence
            )));
        }
        if !unit.contains(&self.default_iou) {
            return Err(DetectError::Config(format!(
                "default_iou {} is outside [0, 1]",
                self.default_iou
            )));
        }
        if !(unit.contains(&self.threshold_min)
            && unit.contains(&self.threshold_max)
            && self.threshold_min < self.threshold_max)
        {
            return Err(DetectError::Config(format!(
                "threshold range [{}, {}] is invalid",
                self.threshold_min, self.threshold_max
            )));
        }
        if !(self.playback.fps.is_finite() && self.playback.fps > 0.0) {
            return Err(DetectError::Config(format!(
                "playback.fps must be positive, got {}",
                self.playback.fps
            )));
        }
        if self.playback.sample_stride == 0 {
            return Err(DetectError::Config(
                "playback.sample_stride must be at least 1".to_string(),
            ));
        }
        if self.playback.buffer_capacity == 0 {
            return Err(DetectError::Config(
                "playback.buffer_capacity must be at least 1".to_string(),
            ));
        }
        if self.model.input_size == 0 || self.model.input_size % 32 != 0 {
            return Err(DetectError::Config(format!(
                "model.input_size must be a positive multiple of 32, got {}",
                self.model.input_size
            )));
        }
        if self.max_display_width == 0 || self.max_display_height == 0 {
            return Err(DetectError::Config(
                "display bounds must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        log::info!("🎛️  当前配置:");
        log::info!(
            "  检测阈值: conf={:.2} iou={:.2}",
            self.default_confidence,
            self.default_iou
        );
        log::info!(
            "  播放: {:.0}fps, 每{}帧检测一次, 队列{}",
            self.playback.fps,
            self.playback.sample_stride,
            self.playback.buffer_capacity
        );
        log::info!(
            "  模型: 输入{}x{}, {:?}",
            self.model.input_size,
            self.model.input_size,
            self.model.execution_provider
        );
    }
}
