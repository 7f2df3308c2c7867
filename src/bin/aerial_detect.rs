//! 航拍人员检测系统 (Aerial Person Detection System)
//!
//! 界面: macroquad 窗口 + egui 面板
//! - 左侧: 模型 / 参数 / 输入 / 视频控制 / 图例
//! - 右侧: 检测结果与统计
//! - 中间: 标注后的画面
//!
//! 播放引擎在后台线程读帧, 每帧通过 `AppController::pump()` 取回主线程。

use std::path::{Path, PathBuf};

use aerial_detect::app::{AppController, AppUpdate, DetectionView, Notice, NoticeLevel};
use aerial_detect::config::{AppConfig, Theme};
use aerial_detect::detection::palette::{class_color, class_emoji, KNOWN_CLASSES};
use aerial_detect::input::VideoInfo;
use clap::Parser;
use egui_macroquad::egui;
use env_logger::Env;
use macroquad::prelude::*;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// 启动参数
#[derive(Parser, Debug)]
#[command(author, version, about = "Aerial Person Detection System", long_about = None)]
struct Args {
    /// JSON 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 启动时加载的 ONNX 模型
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// 启动时打开的图片/视频 (目录为图片序列, stub://N 为合成视频)
    #[arg(short, long)]
    source: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ResultTab {
    Results,
    Statistics,
}

struct Gui {
    app: AppController,
    config: AppConfig,

    // 参数
    confidence: f32,
    iou: f32,

    // 输入
    model_path: String,
    image_path: String,
    video_path: String,

    // 显示
    texture: Option<Texture2D>,
    results_text: String,
    stats_text: String,
    tab: ResultTab,
    view_rect: egui::Rect,

    // 状态
    playing: bool,
    video_info: Option<VideoInfo>,
    frame_number: u64,
    status: String,
    notice: Option<Notice>,
}

impl Gui {
    fn new(app: AppController, config: AppConfig) -> Self {
        let thresholds = app.thresholds();
        Self {
            app,
            confidence: thresholds.confidence,
            iou: thresholds.iou,
            model_path: String::new(),
            image_path: String::new(),
            video_path: String::new(),
            texture: None,
            results_text: String::new(),
            stats_text: String::new(),
            tab: ResultTab::Results,
            view_rect: egui::Rect::NOTHING,
            playing: false,
            video_info: None,
            frame_number: 0,
            status: "Model: none".to_string(),
            notice: None,
            config,
        }
    }

    /// 命令行指定的模型和输入
    fn startup(&mut self, args: &Args) {
        if let Some(model) = &args.model {
            self.model_path = model.display().to_string();
            self.load_model();
        }
        if let Some(source) = &args.source {
            if is_image_file(source) {
                self.image_path = source.clone();
                self.detect_image();
            } else {
                self.video_path = source.clone();
                self.load_video();
            }
        }
    }

    fn show_notice(&mut self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => log::info!("{}: {}", notice.title, notice.message),
            NoticeLevel::Warning => log::warn!("{}: {}", notice.title, notice.message),
            NoticeLevel::Error => log::error!("{}: {}", notice.title, notice.message),
        }
        self.notice = Some(notice);
    }

    fn show_view(&mut self, view: DetectionView) {
        let (w, h) = view.annotated.dimensions();
        let rgba = image::DynamicImage::ImageRgb8(view.annotated).to_rgba8();
        let texture = Texture2D::from_rgba8(w as u16, h as u16, &rgba);
        texture.set_filter(FilterMode::Linear);
        self.texture = Some(texture);
        self.results_text = view.results_text;
        self.stats_text = view.stats_text;
    }

    // ========== 操作 ==========

    fn load_model(&mut self) {
        let path = self.model_path.trim().to_string();
        if path.is_empty() {
            return;
        }
        match self.app.load_model(&path) {
            Ok(summary) => {
                self.status = format!("Model: {}", summary.name);
                self.show_notice(Notice::info(
                    "Model Loaded",
                    format!(
                        "Loaded {} ({} classes)",
                        summary.name,
                        summary.class_names.len()
                    ),
                ));
            }
            Err(e) => self.show_notice(Notice::from_error(&e)),
        }
    }

    fn detect_image(&mut self) {
        self.stop_playback();
        let path = self.image_path.trim().to_string();
        match self.app.detect_image(&path) {
            Ok(view) => {
                self.video_info = None;
                self.show_view(view);
            }
            Err(e) => self.show_notice(Notice::from_error(&e)),
        }
    }

    fn load_video(&mut self) {
        let path = self.video_path.trim().to_string();
        match self.app.load_video(&path) {
            Ok(summary) => {
                self.playing = false;
                self.frame_number = 0;
                self.video_info = Some(summary.info);
                if let Some(view) = summary.first_frame {
                    self.show_view(view);
                }
            }
            Err(e) => self.show_notice(Notice::from_error(&e)),
        }
    }

    fn toggle_playback(&mut self) {
        match self.app.toggle_playback() {
            Ok(playing) => self.playing = playing,
            Err(e) => self.show_notice(Notice::from_error(&e)),
        }
    }

    fn stop_playback(&mut self) {
        self.app.stop_playback();
        self.playing = false;
        self.frame_number = 0;
    }

    // ========== 每帧 ==========

    fn update(&mut self) {
        for update in self.app.pump() {
            match update {
                AppUpdate::Playback(playing) => self.playing = playing,
                AppUpdate::Frame { frame_number, view } => {
                    self.frame_number = frame_number;
                    self.show_view(view);
                }
                AppUpdate::Notice(notice) => self.show_notice(notice),
            }
        }
    }

    fn draw_frame(&self) {
        let Some(texture) = &self.texture else {
            return;
        };
        let area = self.view_rect;
        if area.width() <= 0.0 || area.height() <= 0.0 {
            return;
        }

        // 居中, 不放大
        let scale = (area.width() / texture.width())
            .min(area.height() / texture.height())
            .min(1.0);
        let (w, h) = (texture.width() * scale, texture.height() * scale);
        let x = area.min.x + (area.width() - w) / 2.0;
        let y = area.min.y + (area.height() - h) / 2.0;

        draw_texture_ex(
            texture,
            x,
            y,
            WHITE,
            DrawTextureParams {
                dest_size: Some(vec2(w, h)),
                ..Default::default()
            },
        );
    }

    fn draw_egui(&mut self) {
        egui_macroquad::ui(|ctx| {
            match self.config.theme {
                Theme::Dark => ctx.set_visuals(egui::Visuals::dark()),
                Theme::Light => ctx.set_visuals(egui::Visuals::light()),
            }

            if is_key_pressed(KeyCode::Space) && !ctx.wants_keyboard_input() {
                self.toggle_playback();
            }

            egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label(&self.status);
                    ui.separator();
                    ui.label(format!(
                        "conf {:.2} | iou {:.2}",
                        self.confidence, self.iou
                    ));
                    if let Some(info) = &self.video_info {
                        ui.separator();
                        ui.label(format!(
                            "{}x{} @ {:.1}fps | frame {}",
                            info.width, info.height, info.fps, self.frame_number
                        ));
                    }
                });
            });

            egui::SidePanel::left("controls")
                .default_width(300.0)
                .show(ctx, |ui| {
                    egui::ScrollArea::vertical().show(ui, |ui| self.controls_ui(ui));
                });

            egui::SidePanel::right("results")
                .default_width(320.0)
                .show(ctx, |ui| self.results_ui(ui));

            self.view_rect = ctx.available_rect();

            self.notice_ui(ctx);
        });
    }

    fn controls_ui(&mut self, ui: &mut egui::Ui) {
        ui.heading("🤖 Model");
        ui.horizontal(|ui| {
            ui.text_edit_singleline(&mut self.model_path);
            if ui.button("Load").clicked() {
                self.load_model();
            }
        });
        ui.label(&self.status);
        ui.separator();

        ui.heading("⚙️ Parameters");
        let (min, max) = (self.config.threshold_min, self.config.threshold_max);
        let step = ((max - min) / self.config.threshold_steps.max(1) as f32) as f64;
        if ui
            .add(
                egui::Slider::new(&mut self.confidence, min..=max)
                    .step_by(step)
                    .text("Confidence"),
            )
            .changed()
        {
            if let Err(e) = self.app.set_confidence(self.confidence) {
                self.show_notice(Notice::from_error(&e));
            }
        }
        if ui
            .add(
                egui::Slider::new(&mut self.iou, min..=max)
                    .step_by(step)
                    .text("IoU"),
            )
            .changed()
        {
            if let Err(e) = self.app.set_iou(self.iou) {
                self.show_notice(Notice::from_error(&e));
            }
        }
        ui.separator();

        ui.heading("📁 Input");
        ui.label("Image");
        ui.horizontal(|ui| {
            ui.text_edit_singleline(&mut self.image_path);
            if ui.button("Detect").clicked() {
                self.detect_image();
            }
        });
        ui.label("Video");
        ui.horizontal(|ui| {
            ui.text_edit_singleline(&mut self.video_path);
            if ui.button("Open").clicked() {
                self.load_video();
            }
        });
        ui.separator();

        ui.heading("🎬 Video Controls");
        ui.add_enabled_ui(self.video_info.is_some(), |ui| {
            ui.horizontal(|ui| {
                let label = if self.playing { "⏸ Pause" } else { "▶ Play" };
                if ui.button(label).clicked() {
                    self.toggle_playback();
                }
                if ui.button("⏹ Stop").clicked() {
                    self.stop_playback();
                }
            });
        });
        ui.separator();

        ui.heading("🎨 Legend");
        for class in KNOWN_CLASSES {
            let [r, g, b] = class_color(class);
            ui.colored_label(
                egui::Color32::from_rgb(r, g, b),
                format!("{} {}", class_emoji(class), class),
            );
        }
    }

    fn results_ui(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.selectable_value(&mut self.tab, ResultTab::Results, "🎯 Results");
            ui.selectable_value(&mut self.tab, ResultTab::Statistics, "📊 Statistics");
        });
        ui.separator();
        let text = match self.tab {
            ResultTab::Results => &self.results_text,
            ResultTab::Statistics => &self.stats_text,
        };
        egui::ScrollArea::vertical().show(ui, |ui| {
            ui.monospace(text.as_str());
        });
    }

    fn notice_ui(&mut self, ctx: &egui::Context) {
        let Some(notice) = &self.notice else {
            return;
        };
        let color = match notice.level {
            NoticeLevel::Info => egui::Color32::LIGHT_GREEN,
            NoticeLevel::Warning => egui::Color32::YELLOW,
            NoticeLevel::Error => egui::Color32::LIGHT_RED,
        };

        let mut close = false;
        egui::Window::new(notice.title.as_str())
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .show(ctx, |ui| {
                ui.colored_label(color, notice.message.as_str());
                if ui.button("OK").clicked() {
                    close = true;
                }
            });
        if close {
            self.notice = None;
        }
    }
}

fn is_image_file(source: &str) -> bool {
    let path = Path::new(source);
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

async fn run(config: AppConfig, args: Args) {
    let app = match AppController::new(config.clone()) {
        Ok(app) => app,
        Err(e) => {
            log::error!("❌ 初始化失败: {}", e);
            return;
        }
    };

    let mut gui = Gui::new(app, config);
    gui.startup(&args);
    log::info!("✅ 系统就绪");

    prevent_quit();
    loop {
        if is_quit_requested() {
            break;
        }
        gui.update();

        clear_background(Color::from_rgba(24, 24, 28, 255));
        gui.draw_egui();
        gui.draw_frame();
        egui_macroquad::draw();

        next_frame().await;
    }

    log::info!("👋 退出, 释放资源");
    gui.app.shutdown();
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    config.log_summary();

    log::info!("🚀 {} 启动", config.window_title);
    let conf = Conf {
        window_title: config.window_title.clone(),
        window_width: config.window_width as i32,
        window_height: config.window_height as i32,
        window_resizable: true,
        ..Default::default()
    };

    macroquad::Window::from_config(conf, run(config, args));
    Ok(())
}
