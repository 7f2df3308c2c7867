//! 错误类型 (Error types)
//!
//! 公共接口统一返回 `DetectError`, 后端内部使用 `anyhow` 传递上下文,
//! 在模型网关/播放引擎的边界处转换。

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    /// 模型文件不可读/损坏/不存在
    #[error("failed to load model {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    /// 未加载模型就请求推理
    #[error("no model loaded")]
    ModelNotLoaded,

    #[error("{name} threshold {value} is outside [0, 1]")]
    ThresholdOutOfRange { name: &'static str, value: f32 },

    /// 视频文件无法打开或解码
    #[error("failed to open video {path}: {reason}")]
    VideoOpen { path: String, reason: String },

    #[error("no video loaded")]
    NoVideoLoaded,

    #[error("failed to load image {path}: {reason}")]
    ImageLoad { path: PathBuf, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DetectError>;

/// anyhow 错误链展开成一行可读文本
pub(crate) fn describe(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}
