// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

// ONNX Runtime 推理后端
//
// 支持 YOLOv5 / YOLOv8 导出的检测模型
// 包含: 模型加载、预处理 (letterbox)、推理、后处理 (解码 + NMS)

use std::path::Path;

use anyhow::{anyhow, bail, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::Array4;
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use regex::Regex;

use super::{BackendLoader, InferenceBackend, Thresholds};
use crate::config::{ExecutionProvider, ModelSettings};
use crate::detection::{BBox, Detection};

/// NMS 之后最多保留的目标数
const MAX_DETECTIONS: usize = 1000;
/// 元数据中类别 id 的上限, 超出的条目忽略
const MAX_CLASSES: usize = 10_000;

/// letterbox 填充值 (与 Ultralytics 一致)
const PAD_VALUE: f32 = 144.0 / 255.0;

/// ONNX Runtime 后端
pub struct OrtBackend {
    session: Session,
    name: String,
    names: Vec<String>,
    input_size: u32,
}

impl OrtBackend {
    /// 从模型文件构建推理会话
    pub fn build(path: &Path, settings: &ModelSettings) -> Result<Self> {
        if !path.is_file() {
            bail!("model file not found: {}", path.display());
        }

        let mut builder = Session::builder()
            .map_err(|e| anyhow!("create ORT session builder: {}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("set optimization level: {}", e))?
            .with_intra_threads(settings.intra_threads)
            .map_err(|e| anyhow!("set intra-op threads: {}", e))?;

        // execution provider
        if settings.execution_provider == ExecutionProvider::Cuda {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(settings.device_id)
                    .build()])
                .map_err(|e| anyhow!("register CUDA execution provider: {}", e))?;
        }

        let session = builder
            .commit_from_file(path)
            .map_err(|e| anyhow!("load ONNX model {}: {}", path.display(), e))?;

        // class names (Ultralytics 导出时写入 metadata 的 names 字段)
        let names = session
            .metadata()
            .ok()
            .and_then(|meta| meta.custom("names").ok().flatten())
            .map(|raw| parse_names(&raw))
            .unwrap_or_default();
        if names.is_empty() {
            log::warn!("⚠️  模型未包含类别名称, 使用 class_<id> 代替");
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            session,
            name,
            names,
            input_size: settings.input_size,
        })
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }
}

impl InferenceBackend for OrtBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_names(&self) -> &[String] {
        &self.names
    }

    fn infer(&mut self, image: &DynamicImage, thresholds: Thresholds) -> Result<Vec<Detection>> {
        let t_pre = std::time::Instant::now();
        let (xs, ratio) = letterbox(image, self.input_size);
        let input = Tensor::from_array(xs)
            .map_err(|e| anyhow!("create input tensor: {}", e))?;
        log::trace!("[Model Preprocess]: {:?}", t_pre.elapsed());

        let t_run = std::time::Instant::now();
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| anyhow!("ONNX inference: {}", e))?;
        log::trace!("[Model Inference]: {:?}", t_run.elapsed());

        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let (shape, preds) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("extract output tensor: {}", e))?;
        let dims: Vec<i64> = shape.iter().copied().collect();

        decode_predictions(
            &dims,
            preds,
            ratio,
            image.dimensions(),
            thresholds,
            &self.names,
        )
    }
}

/// ONNX 模型加载器
pub struct OrtLoader {
    settings: ModelSettings,
}

impl OrtLoader {
    pub fn new(settings: ModelSettings) -> Self {
        Self { settings }
    }
}

impl BackendLoader for OrtLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(OrtBackend::build(path, &self.settings)?))
    }
}

/// 等比缩放到 size×size (左上对齐, 其余填充), 返回 NCHW 张量和缩放比例
fn letterbox(image: &DynamicImage, size: u32) -> (Array4<f32>, f32) {
    let (w0, h0) = image.dimensions();
    let ratio = (size as f32 / w0.max(1) as f32).min(size as f32 / h0.max(1) as f32);
    let w1 = ((w0 as f32 * ratio).round() as u32).clamp(1, size);
    let h1 = ((h0 as f32 * ratio).round() as u32).clamp(1, size);

    let resized = image.resize_exact(w1, h1, FilterType::Triangle).to_rgb8();

    let mut xs = Array4::from_elem((1, 3, size as usize, size as usize), PAD_VALUE);
    for (x, y, rgb) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = rgb.0;
        xs[[0, 0, y, x]] = r as f32 / 255.0;
        xs[[0, 1, y, x]] = g as f32 / 255.0;
        xs[[0, 2, y, x]] = b as f32 / 255.0;
    }

    (xs, ratio)
}

/// 输出布局
#[derive(Clone, Copy, Debug, PartialEq)]
enum Layout {
    /// YOLOv5: [1, anchors, 5 + nc], 含 objectness
    AnchorsFirst { anchors: usize, features: usize },
    /// YOLOv8: [1, 4 + nc, anchors]
    FeaturesFirst { anchors: usize, features: usize },
}

impl Layout {
    fn from_dims(dims: &[i64]) -> Result<Self> {
        if dims.len() != 3 || dims.iter().any(|&d| d <= 0) {
            bail!("unexpected output shape {:?}", dims);
        }
        let (a, b) = (dims[1] as usize, dims[2] as usize);
        let layout = if a < b {
            Layout::FeaturesFirst {
                anchors: b,
                features: a,
            }
        } else {
            Layout::AnchorsFirst {
                anchors: a,
                features: b,
            }
        };
        let min_features = match layout {
            Layout::AnchorsFirst { .. } => 6,
            Layout::FeaturesFirst { .. } => 5,
        };
        if layout.features() < min_features {
            bail!("output shape {:?} has too few features", dims);
        }
        Ok(layout)
    }

    fn anchors(&self) -> usize {
        match *self {
            Layout::AnchorsFirst { anchors, .. } | Layout::FeaturesFirst { anchors, .. } => anchors,
        }
    }

    fn features(&self) -> usize {
        match *self {
            Layout::AnchorsFirst { features, .. } | Layout::FeaturesFirst { features, .. } => {
                features
            }
        }
    }

    fn at(&self, data: &[f32], anchor: usize, feature: usize) -> f32 {
        match *self {
            Layout::AnchorsFirst { features, .. } => data[anchor * features + feature],
            Layout::FeaturesFirst { anchors, .. } => data[feature * anchors + anchor],
        }
    }

    /// 类别分数起始下标
    fn class_offset(&self) -> usize {
        match self {
            Layout::AnchorsFirst { .. } => 5,
            Layout::FeaturesFirst { .. } => 4,
        }
    }
}

/// 模型原始输出 → 检测列表 (原图坐标)
fn decode_predictions(
    dims: &[i64],
    data: &[f32],
    ratio: f32,
    image_size: (u32, u32),
    thresholds: Thresholds,
    names: &[String],
) -> Result<Vec<Detection>> {
    let layout = Layout::from_dims(dims)?;
    if data.len() < layout.anchors() * layout.features() {
        bail!(
            "output tensor has {} values, shape {:?} needs {}",
            data.len(),
            dims,
            layout.anchors() * layout.features()
        );
    }

    let (width, height) = (image_size.0 as f32, image_size.1 as f32);
    let offset = layout.class_offset();
    let mut candidates = Vec::new();

    for anchor in 0..layout.anchors() {
        let (class_id, class_score) = (offset..layout.features())
            .map(|f| (f - offset, layout.at(data, anchor, f)))
            .fold((0, f32::NEG_INFINITY), |best, x| if x.1 > best.1 { x } else { best });

        let confidence = match layout {
            Layout::AnchorsFirst { .. } => layout.at(data, anchor, 4) * class_score,
            Layout::FeaturesFirst { .. } => class_score,
        };
        if confidence < thresholds.confidence {
            continue;
        }

        let bbox = BBox::from_cxcywh(
            layout.at(data, anchor, 0) / ratio,
            layout.at(data, anchor, 1) / ratio,
            layout.at(data, anchor, 2) / ratio,
            layout.at(data, anchor, 3) / ratio,
        )
        .clamp(width, height);
        if !bbox.is_valid() {
            continue;
        }

        let label = names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id));
        candidates.push(Detection::new(bbox, class_id, label, confidence.min(1.0)));
    }

    non_max_suppression(&mut candidates, thresholds.iou);
    candidates.truncate(MAX_DETECTIONS);
    Ok(candidates)
}

/// 按类别的贪心 NMS, 结果按置信度降序
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(xs.len());
    for det in xs.drain(..) {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou_threshold);
        if !suppressed {
            kept.push(det);
        }
    }
    *xs = kept;
}

/// 解析 metadata 中的类别表
///
/// 支持 `{0: 'person', 1: 'car'}` (Ultralytics) 和 `["person", "car"]` (JSON)
fn parse_names(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return serde_json::from_str(raw).unwrap_or_default();
    }

    let Ok(re) = Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#) else {
        return Vec::new();
    };
    let mut pairs: Vec<(usize, String)> = re
        .captures_iter(raw)
        .filter_map(|cap| Some((cap[1].parse().ok()?, cap[2].to_string())))
        .collect();
    pairs.retain(|(id, name)| {
        let ok = *id < MAX_CLASSES;
        if !ok {
            log::warn!("⚠️  忽略异常类别 id {} ({})", id, name);
        }
        ok
    });
    pairs.sort_by_key(|(id, _)| *id);

    let len = pairs
        .last()
        .and_then(|(id, _)| id.checked_add(1))
        .unwrap_or(0);
    let mut names: Vec<String> = (0..len).map(|i| format!("class_{}", i)).collect();
    for (id, name) in pairs {
        names[id] = name;
    }
    names
}
