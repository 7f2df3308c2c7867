//! 模型统一接口与实现
//!
//! # 架构说明
//!
//! ## InferenceBackend
//! 推理后端的统一接口: 图片 → 检测列表。阈值在每次调用时传入,
//! 后端自身不缓存阈值。
//!
//! ## BackendLoader
//! 从模型文件构造后端。`ModelManager` 通过它加载模型, 测试中可替换为假后端。
//!
//! ## 实现
//! - **OrtBackend**: ONNX Runtime, 支持 YOLOv5 / YOLOv8 导出的检测模型
//!   - 文件: `ort_backend.rs`
//!
//! ## 使用示例
//! ```no_run
//! use aerial_detect::config::ModelSettings;
//! use aerial_detect::models::{ModelManager, OrtLoader};
//!
//! let mut models = ModelManager::new(Box::new(OrtLoader::new(ModelSettings::default())));
//! models.load("models/yolov5s.onnx")?;
//! let image = image::open("demo.jpg").unwrap();
//! let batch = models.predict(&image)?;
//! # Ok::<(), aerial_detect::DetectError>(())
//! ```
use std::path::Path;

use anyhow::Result;
use image::DynamicImage;

use crate::detection::Detection;

pub mod manager;
pub mod ort_backend;

pub use manager::{ModelManager, NO_MODEL_NAME};
pub use ort_backend::{OrtBackend, OrtLoader};

/// 置信度 / IoU 阈值
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub confidence: f32,
    pub iou: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            iou: 0.45,
        }
    }
}

/// 推理后端 (模型被视为不透明的预测函数)
pub trait InferenceBackend: Send {
    /// 后端名称 (日志用)
    fn name(&self) -> &str;

    /// 类别名称表, 下标即类别ID
    fn class_names(&self) -> &[String];

    /// 对单张图片推理
    ///
    /// # Arguments
    /// * `image` - 原始图片, 返回的坐标相对于它
    /// * `thresholds` - 本次调用使用的阈值
    fn infer(&mut self, image: &DynamicImage, thresholds: Thresholds) -> Result<Vec<Detection>>;
}

/// 模型加载器
pub trait BackendLoader: Send {
    fn load(&self, path: &Path) -> Result<Box<dyn InferenceBackend>>;
}
