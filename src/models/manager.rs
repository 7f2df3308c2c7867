//! 模型网关 (Model Gateway)
//! 职责: 加载模型、保存阈值、推理并转换为 DetectionBatch

use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView};

use super::{BackendLoader, InferenceBackend, Thresholds};
use crate::detection::DetectionBatch;
use crate::error::{describe, DetectError, Result};

/// 未加载模型时 `model_name()` 的返回值
pub const NO_MODEL_NAME: &str = "none";

pub struct ModelManager {
    loader: Box<dyn BackendLoader>,
    backend: Option<Box<dyn InferenceBackend>>,
    model_path: Option<PathBuf>,
    thresholds: Thresholds,
    last_error: Option<String>,
}

impl ModelManager {
    pub fn new(loader: Box<dyn BackendLoader>) -> Self {
        Self {
            loader,
            backend: None,
            model_path: None,
            thresholds: Thresholds::default(),
            last_error: None,
        }
    }

    /// 加载模型; 失败时保留之前的模型
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        log::info!("📦 加载模型: {}", path.display());

        match self.loader.load(path) {
            Ok(backend) => {
                log::info!(
                    "✅ 模型加载成功: {} ({} 个类别)",
                    backend.name(),
                    backend.class_names().len()
                );
                self.backend = Some(backend);
                self.model_path = Some(path.to_path_buf());
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                let reason = describe(&e);
                log::error!("❌ 模型加载失败: {}", reason);
                self.last_error = Some(reason.clone());
                Err(DetectError::ModelLoad {
                    path: path.to_path_buf(),
                    reason,
                })
            }
        }
    }

    /// 同时设置两个阈值; 任一越界则都不修改
    pub fn configure(&mut self, confidence: f32, iou: f32) -> Result<()> {
        check_unit("confidence", confidence)?;
        check_unit("iou", iou)?;
        self.thresholds = Thresholds { confidence, iou };
        Ok(())
    }

    pub fn set_confidence(&mut self, confidence: f32) -> Result<()> {
        self.configure(confidence, self.thresholds.iou)
    }

    pub fn set_iou(&mut self, iou: f32) -> Result<()> {
        self.configure(self.thresholds.confidence, iou)
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// 使用当前阈值推理
    pub fn predict(&mut self, image: &DynamicImage) -> Result<DetectionBatch> {
        let thresholds = self.thresholds;
        let backend = self.backend.as_mut().ok_or(DetectError::ModelNotLoaded)?;

        let detections = backend
            .infer(image, thresholds)
            .map_err(|e| DetectError::Inference(describe(&e)))?;

        Ok(DetectionBatch::new(detections, image.dimensions()))
    }

    /// 当前模型文件名, 未加载时为 "none"
    pub fn model_name(&self) -> String {
        self.model_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| NO_MODEL_NAME.to_string())
    }

    pub fn class_names(&self) -> Vec<String> {
        self.backend
            .as_ref()
            .map(|b| b.class_names().to_vec())
            .unwrap_or_default()
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_some()
    }

    /// 最近一次加载失败的原因
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

fn check_unit(name: &'static str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DetectError::ThresholdOutOfRange { name, value })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::detection::{BBox, Detection};
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};

    /// 假后端: 记录每次调用收到的阈值
    pub(crate) struct FakeBackend {
        names: Vec<String>,
        calls: Arc<Mutex<Vec<Thresholds>>>,
        broken: bool,
    }

    impl InferenceBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        fn class_names(&self) -> &[String] {
            &self.names
        }

        fn infer(
            &mut self,
            image: &DynamicImage,
            thresholds: Thresholds,
        ) -> anyhow::Result<Vec<Detection>> {
            self.calls.lock().unwrap().push(thresholds);
            if self.broken {
                return Err(anyhow!("output tensor has unexpected shape"));
            }
            let (w, h) = image.dimensions();
            Ok(vec![Detection::new(
                BBox::new(0.0, 0.0, w as f32 / 2.0, h as f32 / 2.0),
                0,
                "person",
                0.9,
            )])
        }
    }

    /// 假加载器: 路径中包含 "bad" 时加载失败, 包含 "broken" 时推理失败
    pub(crate) struct FakeLoader {
        pub calls: Arc<Mutex<Vec<Thresholds>>>,
    }

    impl FakeLoader {
        pub(crate) fn new() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl BackendLoader for FakeLoader {
        fn load(&self, path: &Path) -> anyhow::Result<Box<dyn InferenceBackend>> {
            if path.to_string_lossy().contains("bad") {
                return Err(anyhow!("model file not found: {}", path.display()));
            }
            Ok(Box::new(FakeBackend {
                names: vec!["person".to_string(), "car".to_string()],
                calls: self.calls.clone(),
                broken: path.to_string_lossy().contains("broken"),
            }))
        }
    }

    fn manager() -> (ModelManager, Arc<Mutex<Vec<Thresholds>>>) {
        let loader = FakeLoader::new();
        let calls = loader.calls.clone();
        (ModelManager::new(Box::new(loader)), calls)
    }

    fn image() -> DynamicImage {
        DynamicImage::new_rgb8(64, 32)
    }

    #[test]
    fn test_predict_without_model() {
        let (mut models, _) = manager();
        assert!(matches!(
            models.predict(&image()),
            Err(DetectError::ModelNotLoaded)
        ));
        assert_eq!(models.model_name(), NO_MODEL_NAME);
        assert!(models.class_names().is_empty());
    }

    #[test]
    fn test_configure_passes_exact_thresholds() {
        let (mut models, calls) = manager();
        models.load("models/yolov5s.onnx").unwrap();

        for &(c, i) in &[(0.0, 1.0), (0.25, 0.6), (1.0, 0.0), (0.5, 0.45)] {
            models.configure(c, i).unwrap();
            models.predict(&image()).unwrap();
            let last = *calls.lock().unwrap().last().unwrap();
            assert_eq!(last, Thresholds { confidence: c, iou: i });
        }
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let (mut models, _) = manager();
        models.configure(0.3, 0.4).unwrap();
        assert!(matches!(
            models.configure(1.5, 0.4),
            Err(DetectError::ThresholdOutOfRange { name: "confidence", .. })
        ));
        assert!(models.set_iou(-0.1).is_err());
        assert!(models.set_confidence(f32::NAN).is_err());
        assert_eq!(models.thresholds(), Thresholds { confidence: 0.3, iou: 0.4 });
    }

    #[test]
    fn test_failed_load_keeps_previous_model() {
        let (mut models, _) = manager();
        models.load("models/good.onnx").unwrap();
        let err = models.load("models/bad.onnx").unwrap_err();
        assert!(matches!(err, DetectError::ModelLoad { .. }));
        assert_eq!(models.model_name(), "good.onnx");
        assert!(models.is_loaded());
        assert!(models.last_error().unwrap().contains("not found"));
    }

    #[test]
    fn test_failed_first_load() {
        let (mut models, _) = manager();
        assert!(models.load("bad.onnx").is_err());
        assert!(!models.is_loaded());
        assert_eq!(models.model_name(), NO_MODEL_NAME);
    }

    #[test]
    fn test_predict_builds_batch() {
        let (mut models, _) = manager();
        models.load("models/good.onnx").unwrap();
        let batch = models.predict(&image()).unwrap();
        assert_eq!(batch.image_size, (64, 32));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.detections[0].label, "person");
        assert_eq!(models.class_names(), vec!["person", "car"]);
    }
}
