//! 应用控制器 (Application Controller)
//!
//! 运行在界面线程。播放引擎的回调跑在后台线程, 只往通道里投递;
//! 界面每帧调用 `pump()` 取回结果, 所有界面状态都在主线程修改。

use std::path::Path;

use crossbeam_channel::{Receiver, TrySendError};
use image::{DynamicImage, RgbImage};

use crate::annotate::{resize_for_display, Annotator};
use crate::config::AppConfig;
use crate::detection::{render_stats_text, render_text, stats, DetectionBatch};
use crate::error::{DetectError, Result};
use crate::input::VideoInfo;
use crate::models::{BackendLoader, ModelManager, OrtLoader, Thresholds};
use crate::playback::{PlaybackEngine, PlaybackFrame};

/// 后台帧 → 界面线程的队列容量
const FRAME_CHANNEL_CAPACITY: usize = 2;

/// 一次检测的展示数据
#[derive(Clone, Debug)]
pub struct DetectionView {
    /// 已绘制检测框并缩放到显示尺寸
    pub annotated: RgbImage,
    pub batch: DetectionBatch,
    pub results_text: String,
    pub stats_text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelSummary {
    pub name: String,
    pub class_names: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct VideoSummary {
    pub info: VideoInfo,
    /// 第0帧的检测结果
    pub first_frame: Option<DetectionView>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// 弹窗提示
#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn from_error(err: &DetectError) -> Self {
        let (level, title) = match err {
            DetectError::ModelLoad { .. } => (NoticeLevel::Error, "Model Load Error"),
            DetectError::ModelNotLoaded => (NoticeLevel::Warning, "No Model"),
            DetectError::ThresholdOutOfRange { .. } => (NoticeLevel::Warning, "Invalid Parameter"),
            DetectError::VideoOpen { .. } => (NoticeLevel::Error, "Video Error"),
            DetectError::NoVideoLoaded => (NoticeLevel::Warning, "No Video"),
            DetectError::ImageLoad { .. } => (NoticeLevel::Error, "Image Error"),
            DetectError::Inference(_) => (NoticeLevel::Error, "Detection Error"),
            DetectError::Config(_) => (NoticeLevel::Error, "Configuration Error"),
        };
        let message = match err {
            DetectError::ModelNotLoaded => "Please load a model first".to_string(),
            DetectError::NoVideoLoaded => "Please load a video first".to_string(),
            other => other.to_string(),
        };
        Self {
            level,
            title: title.to_string(),
            message,
        }
    }
}

/// `pump()` 的结果
#[derive(Debug)]
pub enum AppUpdate {
    /// 播放状态变化 (视频自然结束时为 false)
    Playback(bool),
    /// 最新一帧的检测结果
    Frame {
        frame_number: u64,
        view: DetectionView,
    },
    Notice(Notice),
}

pub struct AppController {
    config: AppConfig,
    models: ModelManager,
    engine: PlaybackEngine,
    annotator: Annotator,
    frame_rx: Receiver<PlaybackFrame>,
    state_rx: Receiver<bool>,
}

impl AppController {
    /// 使用 ONNX Runtime 后端
    pub fn new(config: AppConfig) -> Result<Self> {
        let loader = OrtLoader::new(config.model.clone());
        Self::with_loader(config, Box::new(loader))
    }

    pub fn with_loader(config: AppConfig, loader: Box<dyn BackendLoader>) -> Result<Self> {
        config.validate()?;

        let mut models = ModelManager::new(loader);
        models.configure(config.default_confidence, config.default_iou)?;

        let engine = PlaybackEngine::new(config.playback.clone());
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = crossbeam_channel::unbounded();

        engine.set_frame_callback(move |item: PlaybackFrame| match frame_tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => {
                log::debug!("界面未及时取帧, 丢弃第{}帧", item.frame_number);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(anyhow::anyhow!("controller is gone")),
        });
        engine.set_state_observer(move |playing| {
            let _ = state_tx.send(playing);
        });

        let annotator = Annotator::new(config.font_path.as_deref());

        Ok(Self {
            config,
            models,
            engine,
            annotator,
            frame_rx,
            state_rx,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ========== 模型 ==========

    pub fn load_model(&mut self, path: impl AsRef<Path>) -> Result<ModelSummary> {
        self.models.load(path)?;
        Ok(ModelSummary {
            name: self.models.model_name(),
            class_names: self.models.class_names(),
        })
    }

    pub fn model_name(&self) -> String {
        self.models.model_name()
    }

    pub fn is_model_loaded(&self) -> bool {
        self.models.is_loaded()
    }

    pub fn set_confidence(&mut self, confidence: f32) -> Result<()> {
        self.models.set_confidence(confidence)
    }

    pub fn set_iou(&mut self, iou: f32) -> Result<()> {
        self.models.set_iou(iou)
    }

    pub fn thresholds(&self) -> Thresholds {
        self.models.thresholds()
    }

    // ========== 检测 ==========

    pub fn detect_image(&mut self, path: impl AsRef<Path>) -> Result<DetectionView> {
        if !self.models.is_loaded() {
            return Err(DetectError::ModelNotLoaded);
        }
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| DetectError::ImageLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        log::info!("🖼️  检测图片: {}", path.display());
        self.detect_frame(&image)
    }

    pub fn detect_frame(&mut self, image: &DynamicImage) -> Result<DetectionView> {
        let batch = self.models.predict(image)?;
        let stats = stats(&batch);
        log::debug!("检测到 {} 个目标", stats.total);

        let annotated = self.annotator.draw(&image.to_rgb8(), &batch);
        let annotated = resize_for_display(
            annotated,
            self.config.max_display_width,
            self.config.max_display_height,
        );

        Ok(DetectionView {
            annotated,
            results_text: render_text(&batch),
            stats_text: render_stats_text(&stats),
            batch,
        })
    }

    // ========== 视频 ==========

    /// 打开视频并检测第0帧; 需要先加载模型。第0帧检测失败时关闭视频
    pub fn load_video(&mut self, path: &str) -> Result<VideoSummary> {
        if !self.models.is_loaded() {
            return Err(DetectError::ModelNotLoaded);
        }
        let info = self.engine.load(path)?;
        self.drain();

        let first_frame = match self.engine.first_frame() {
            Some(frame) => match self.detect_frame(&DynamicImage::ImageRgb8(frame.image)) {
                Ok(view) => Some(view),
                Err(e) => {
                    log::warn!("⚠️  第0帧检测失败, 关闭视频 {}: {}", path, e);
                    self.engine.cleanup();
                    return Err(e);
                }
            },
            None => None,
        };
        Ok(VideoSummary { info, first_frame })
    }

    pub fn toggle_playback(&mut self) -> Result<bool> {
        if !self.engine.is_loaded() {
            return Err(DetectError::NoVideoLoaded);
        }
        Ok(self.engine.toggle())
    }

    pub fn stop_playback(&mut self) {
        self.engine.stop();
        self.drain();
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    pub fn video_info(&self) -> VideoInfo {
        self.engine.video_info()
    }

    /// 取回后台结果; 只检测最新的一帧
    pub fn pump(&mut self) -> Vec<AppUpdate> {
        let mut updates: Vec<AppUpdate> = self.state_rx.try_iter().map(AppUpdate::Playback).collect();

        if let Some(latest) = self.frame_rx.try_iter().last() {
            let image = DynamicImage::ImageRgb8(latest.frame.image);
            match self.detect_frame(&image) {
                Ok(view) => updates.push(AppUpdate::Frame {
                    frame_number: latest.frame_number,
                    view,
                }),
                Err(e) => {
                    log::warn!("⚠️  视频帧检测失败: {}", e);
                    updates.push(AppUpdate::Notice(Notice::from_error(&e)));
                }
            }
        }
        updates
    }

    /// 停止播放并释放视频
    pub fn shutdown(&mut self) {
        self.engine.cleanup();
        self.drain();
    }

    fn drain(&self) {
        self.frame_rx.try_iter().for_each(drop);
        self.state_rx.try_iter().for_each(drop);
    }
}

impl Drop for AppController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::manager::tests::FakeLoader;
    use std::time::{Duration, Instant};

    fn controller() -> AppController {
        let mut config = AppConfig::default();
        config.playback.fps = 500.0;
        config.font_path = Some("/nonexistent/font.ttf".to_string());
        AppController::with_loader(config, Box::new(FakeLoader::new())).unwrap()
    }

    fn write_image(dir: &Path, w: u32, h: u32) -> std::path::PathBuf {
        let path = dir.join("scene.png");
        RgbImage::new(w, h).save(&path).unwrap();
        path
    }

    #[test]
    fn test_requires_model() {
        let mut app = controller();
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), 32, 32);

        assert!(matches!(app.detect_image(&path), Err(DetectError::ModelNotLoaded)));
        assert!(matches!(app.load_video("stub://5"), Err(DetectError::ModelNotLoaded)));
        assert_eq!(app.model_name(), "none");
    }

    #[test]
    fn test_detect_image() {
        let mut app = controller();
        let summary = app.load_model("models/aerial.onnx").unwrap();
        assert_eq!(summary.name, "aerial.onnx");
        assert_eq!(summary.class_names, vec!["person", "car"]);

        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), 1600, 1200);
        let view = app.detect_image(&path).unwrap();

        assert_eq!(view.batch.len(), 1);
        assert_eq!(view.batch.image_size, (1600, 1200));
        assert_eq!(view.annotated.dimensions(), (800, 600));
        assert!(view.results_text.contains("person"));
        assert!(view.stats_text.contains("Total Detections: 1"));
    }

    #[test]
    fn test_detect_missing_image() {
        let mut app = controller();
        app.load_model("models/aerial.onnx").unwrap();
        assert!(matches!(
            app.detect_image("/nonexistent/scene.jpg"),
            Err(DetectError::ImageLoad { .. })
        ));
    }

    #[test]
    fn test_thresholds_validation() {
        let mut app = controller();
        app.set_confidence(0.3).unwrap();
        let err = app.set_iou(1.5).unwrap_err();
        assert_eq!(app.thresholds(), Thresholds { confidence: 0.3, iou: 0.45 });
        assert_eq!(Notice::from_error(&err).level, NoticeLevel::Warning);
    }

    #[test]
    fn test_failed_model_load_notice() {
        let mut app = controller();
        app.load_model("models/aerial.onnx").unwrap();
        let err = app.load_model("models/bad.onnx").unwrap_err();
        let notice = Notice::from_error(&err);
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.title, "Model Load Error");
        assert_eq!(app.model_name(), "aerial.onnx");
    }

    #[test]
    fn test_toggle_without_video() {
        let mut app = controller();
        let err = app.toggle_playback().unwrap_err();
        assert!(matches!(err, DetectError::NoVideoLoaded));
        assert_eq!(Notice::from_error(&err).message, "Please load a video first");
    }

    #[test]
    fn test_video_playback_updates() {
        let mut app = controller();
        app.load_model("models/aerial.onnx").unwrap();

        let summary = app.load_video("stub://30?size=80x60").unwrap();
        assert_eq!(summary.info.frame_count, 30);
        assert!(summary.first_frame.is_some());

        assert!(app.toggle_playback().unwrap());

        let mut frames = Vec::new();
        let mut stopped = false;
        let deadline = Instant::now() + Duration::from_secs(5);
        while !stopped && Instant::now() < deadline {
            for update in app.pump() {
                match update {
                    AppUpdate::Playback(false) => stopped = true,
                    AppUpdate::Frame { frame_number, view } => {
                        assert_eq!(view.batch.image_size, (80, 60));
                        frames.push(frame_number);
                    }
                    _ => {}
                }
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(stopped);
        assert!(!app.is_playing());
        assert!(frames.iter().all(|n| n % 3 == 0));
        assert!(frames.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_first_frame_failure_closes_video() {
        let mut app = controller();
        app.load_model("models/broken.onnx").unwrap();
        assert!(app.load_video("stub://5").is_err());
        assert_eq!(app.video_info(), VideoInfo::default());
        assert!(matches!(app.toggle_playback(), Err(DetectError::NoVideoLoaded)));
    }

    #[test]
    fn test_stop_and_shutdown() {
        let mut app = controller();
        app.load_model("models/aerial.onnx").unwrap();
        app.load_video("stub://100000").unwrap();
        assert!(app.toggle_playback().unwrap());
        app.stop_playback();
        assert!(!app.is_playing());
        app.shutdown();
        app.shutdown();
        assert_eq!(app.video_info(), VideoInfo::default());
        assert!(matches!(app.toggle_playback(), Err(DetectError::NoVideoLoaded)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AppConfig::default();
        config.default_confidence = 2.0;
        assert!(matches!(
            AppController::with_loader(config, Box::new(FakeLoader::new())),
            Err(DetectError::Config(_))
        ));
    }
}
