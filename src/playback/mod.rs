//! 视频播放引擎 (Playback Engine)
//!
//! 两个后台线程:
//! - 读帧线程: 按固定节奏读帧, 每 `sample_stride` 帧送一帧进有界队列 (满则丢弃)
//! - 分发线程: 从队列取帧, 依次调用帧回调
//!
//! 状态机: Stopped → Playing → Stopped。停止会把视频回退到第0帧并清零计数器。
//! 回调运行在后台线程, 界面线程通过通道接收结果。

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::config::PlaybackSettings;
use crate::error::Result;
use crate::input::{VideoFrame, VideoInfo, VideoSource};

/// 送检的帧
#[derive(Clone, Debug)]
pub struct PlaybackFrame {
    /// 读帧计数器的值 (步长为3时: 3, 6, 9 ...)
    pub frame_number: u64,
    pub frame: VideoFrame,
}

pub type FrameCallback = Box<dyn FnMut(PlaybackFrame) -> anyhow::Result<()> + Send>;
pub type StateObserver = Box<dyn FnMut(bool) + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 线程间共享状态
struct Shared {
    source: Mutex<Option<VideoSource>>,
    playing: AtomicBool,
    delivering: AtomicBool,
    counter: AtomicU64,
    /// 每次 start 递增, 旧线程据此退出
    session: AtomicU64,
    on_frame: Mutex<Option<FrameCallback>>,
    on_state: Mutex<Option<StateObserver>>,
}

impl Shared {
    fn is_current(&self, session: u64) -> bool {
        self.session.load(Ordering::SeqCst) == session
    }

    fn deliver(&self, item: PlaybackFrame) {
        let mut callback = lock(&self.on_frame);
        let Some(callback) = callback.as_mut() else {
            return;
        };
        let number = item.frame_number;
        match panic::catch_unwind(AssertUnwindSafe(|| callback(item))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("⚠️  帧回调失败 (第{}帧): {:#}", number, e),
            Err(_) => log::error!("❌ 帧回调 panic (第{}帧), 继续播放", number),
        }
    }

    fn notify_state(&self, playing: bool) {
        let mut observer = lock(&self.on_state);
        if let Some(observer) = observer.as_mut() {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(playing))).is_err() {
                log::error!("❌ 状态回调 panic");
            }
        }
    }
}

pub struct PlaybackEngine {
    settings: PlaybackSettings,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    delivery: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    pub fn new(settings: PlaybackSettings) -> Self {
        Self {
            settings,
            shared: Arc::new(Shared {
                source: Mutex::new(None),
                playing: AtomicBool::new(false),
                delivering: AtomicBool::new(false),
                counter: AtomicU64::new(0),
                session: AtomicU64::new(0),
                on_frame: Mutex::new(None),
                on_state: Mutex::new(None),
            }),
            reader: None,
            delivery: None,
        }
    }

    pub fn settings(&self) -> &PlaybackSettings {
        &self.settings
    }

    /// 打开视频并替换当前会话
    pub fn load(&mut self, path: &str) -> Result<VideoInfo> {
        let source = VideoSource::open(path)?;
        let info = source.info();
        self.load_source(source);
        Ok(info)
    }

    pub fn load_source(&mut self, source: VideoSource) {
        self.stop();
        self.join_workers();
        if let Some(mut old) = lock(&self.shared.source).replace(source) {
            old.close();
        }
        self.shared.counter.store(0, Ordering::SeqCst);
    }

    pub fn set_frame_callback<F>(&self, callback: F)
    where
        F: FnMut(PlaybackFrame) -> anyhow::Result<()> + Send + 'static,
    {
        *lock(&self.shared.on_frame) = Some(Box::new(callback));
    }

    pub fn set_state_observer<F>(&self, observer: F)
    where
        F: FnMut(bool) + Send + 'static,
    {
        *lock(&self.shared.on_state) = Some(Box::new(observer));
    }

    /// 开始播放; 返回是否真正启动了新的播放
    pub fn start(&mut self) -> bool {
        if self.is_playing() {
            return false;
        }
        let loaded = lock(&self.shared.source)
            .as_ref()
            .map_or(false, |s| s.is_open());
        if !loaded {
            log::warn!("⚠️  没有已打开的视频, 忽略播放请求");
            return false;
        }

        // 上一轮播放结束后残留的线程
        self.join_workers();

        let session = self.shared.session.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.playing.store(true, Ordering::SeqCst);
        self.shared.delivering.store(true, Ordering::SeqCst);

        let (tx, rx) = crossbeam_channel::bounded(self.settings.buffer_capacity.max(1));

        let shared = self.shared.clone();
        let stride = self.settings.sample_stride.max(1);
        let interval = self.settings.frame_interval();
        let reader = thread::Builder::new()
            .name("playback-reader".to_string())
            .spawn(move || reader_loop(shared, tx, stride, interval, session));

        let shared = self.shared.clone();
        let poll = self.settings.poll_timeout();
        let delivery = thread::Builder::new()
            .name("playback-delivery".to_string())
            .spawn(move || delivery_loop(shared, rx, poll, session));

        match (reader, delivery) {
            (Ok(reader), Ok(delivery)) => {
                self.reader = Some(reader);
                self.delivery = Some(delivery);
                log::info!(
                    "▶️  开始播放 ({:.0}fps, 每{}帧检测一次)",
                    self.settings.fps,
                    stride
                );
                true
            }
            (reader, delivery) => {
                log::error!("❌ 播放线程创建失败");
                self.shared.playing.store(false, Ordering::SeqCst);
                self.shared.delivering.store(false, Ordering::SeqCst);
                self.reader = reader.ok();
                self.delivery = delivery.ok();
                self.join_workers();
                false
            }
        }
    }

    /// 停止播放并回到第0帧; 未开始时什么都不做
    pub fn stop(&self) {
        let was_playing = self.shared.playing.swap(false, Ordering::SeqCst);
        self.shared.delivering.store(false, Ordering::SeqCst);
        if !was_playing {
            return;
        }

        if let Some(source) = lock(&self.shared.source).as_mut() {
            source.reset();
        }
        self.shared.counter.store(0, Ordering::SeqCst);
        log::info!("⏹️  播放已停止");
    }

    /// 播放/暂停切换, 返回切换后的状态
    pub fn toggle(&mut self) -> bool {
        if self.is_playing() {
            self.stop();
        } else {
            self.start();
        }
        self.is_playing()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    /// 当前读帧计数
    pub fn frame_counter(&self) -> u64 {
        self.shared.counter.load(Ordering::SeqCst)
    }

    /// 停止 + 等待线程退出 + 关闭视频; 可重复调用
    pub fn cleanup(&mut self) {
        self.stop();
        self.join_workers();
        if let Some(source) = lock(&self.shared.source).as_mut() {
            source.close();
        }
    }

    /// 读取第0帧预览 (仅在停止状态)
    pub fn first_frame(&self) -> Option<VideoFrame> {
        if self.is_playing() {
            return None;
        }
        let mut guard = lock(&self.shared.source);
        let source = guard.as_mut()?;
        source.reset();
        let frame = source.read_next();
        source.reset();
        frame
    }

    pub fn video_info(&self) -> VideoInfo {
        lock(&self.shared.source)
            .as_ref()
            .map(|s| s.info())
            .unwrap_or_default()
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.shared.source)
            .as_ref()
            .map_or(false, |s| s.is_open())
    }

    /// 有限时间内等待后台线程退出, 超时则分离
    fn join_workers(&mut self) {
        let deadline = Instant::now() + self.settings.join_timeout();
        for handle in [self.reader.take(), self.delivery.take()].into_iter().flatten() {
            let name = handle.thread().name().unwrap_or("playback").to_string();
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if !handle.is_finished() {
                log::warn!("⚠️  线程 {} 未在超时内退出, 已分离", name);
                continue;
            }
            if handle.join().is_err() {
                log::error!("❌ 线程 {} 异常退出", name);
            }
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn reader_loop(
    shared: Arc<Shared>,
    tx: Sender<PlaybackFrame>,
    stride: u64,
    interval: Duration,
    session: u64,
) {
    log::debug!("读帧线程启动 (session {})", session);
    loop {
        let (number, frame) = {
            let mut source = lock(&shared.source);
            if !shared.is_current(session) || !shared.playing.load(Ordering::SeqCst) {
                break;
            }
            match source.as_mut().and_then(|s| s.read_next()) {
                // 计数与读帧在同一把锁内, stop 清零不会被覆盖
                Some(frame) => (shared.counter.fetch_add(1, Ordering::SeqCst) + 1, frame),
                None => {
                    // 播放结束: 回到第0帧
                    let was_playing = shared.playing.swap(false, Ordering::SeqCst);
                    if let Some(source) = source.as_mut() {
                        source.reset();
                    }
                    shared.counter.store(0, Ordering::SeqCst);
                    drop(source);

                    log::info!("🏁 视频播放结束");
                    if was_playing {
                        shared.notify_state(false);
                    }
                    break;
                }
            }
        };

        if number % stride == 0 {
            match tx.try_send(PlaybackFrame {
                frame_number: number,
                frame,
            }) {
                Ok(()) => {}
                Err(TrySendError::Full(dropped)) => {
                    log::debug!("队列已满, 丢弃第{}帧", dropped.frame_number)
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        }

        thread::sleep(interval);
    }
    log::debug!("读帧线程退出 (session {})", session);
}

fn delivery_loop(shared: Arc<Shared>, rx: Receiver<PlaybackFrame>, poll: Duration, session: u64) {
    while shared.delivering.load(Ordering::SeqCst) && shared.is_current(session) {
        match rx.recv_timeout(poll) {
            Ok(item) => shared.deliver(item),
            Err(RecvTimeoutError::Timeout) => continue,
            // 读帧线程已退出且队列已清空
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    if shared.is_current(session) {
        shared.delivering.store(false, Ordering::SeqCst);
    }
    log::debug!("分发线程退出 (session {})", session);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_settings() -> PlaybackSettings {
        PlaybackSettings {
            fps: 500.0,
            ..PlaybackSettings::default()
        }
    }

    fn engine(path: &str, settings: PlaybackSettings) -> PlaybackEngine {
        let mut engine = PlaybackEngine::new(settings);
        engine.load(path).unwrap();
        engine
    }

    fn collect_frames(engine: &PlaybackEngine) -> Arc<Mutex<Vec<u64>>> {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        engine.set_frame_callback(move |item| {
            sink.lock().unwrap().push(item.frame_number);
            Ok(())
        });
        frames
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn test_stride_sampling_and_end_of_stream() {
        let mut engine = engine("stub://10", fast_settings());
        let frames = collect_frames(&engine);
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        engine.set_state_observer(move |playing| {
            let _ = state_tx.send(playing);
        });

        assert!(engine.start());

        assert_eq!(state_rx.recv_timeout(Duration::from_secs(5)), Ok(false));
        assert!(wait_until(Duration::from_secs(5), || frames.lock().unwrap().len() == 3));
        assert_eq!(*frames.lock().unwrap(), vec![3, 6, 9]);

        // 结束后回到第0帧
        assert!(!engine.is_playing());
        assert_eq!(engine.frame_counter(), 0);
        assert_eq!(engine.first_frame().unwrap().index, 0);
    }

    #[test]
    fn test_delivered_frame_indices() {
        let mut engine = engine("stub://7", fast_settings());
        let indices = Arc::new(Mutex::new(Vec::new()));
        let sink = indices.clone();
        engine.set_frame_callback(move |item| {
            sink.lock().unwrap().push(item.frame.index);
            Ok(())
        });
        engine.start();
        assert!(wait_until(Duration::from_secs(5), || indices.lock().unwrap().len() == 2));
        assert_eq!(*indices.lock().unwrap(), vec![2, 5]);
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let empty = PlaybackEngine::new(fast_settings());
        empty.stop();
        assert!(!empty.is_playing());

        let engine = engine("stub://5", fast_settings());
        engine.stop();
        engine.stop();
        assert!(!engine.is_playing());
        assert!(engine.is_loaded());
    }

    #[test]
    fn test_start_without_video() {
        let mut engine = PlaybackEngine::new(fast_settings());
        assert!(!engine.start());
        assert!(!engine.toggle());
        assert_eq!(engine.video_info(), VideoInfo::default());
    }

    #[test]
    fn test_toggle_and_stop_resets() {
        let mut engine = engine("stub://100000", fast_settings());
        let frames = collect_frames(&engine);

        assert!(engine.toggle());
        assert!(!engine.start());
        assert!(wait_until(Duration::from_secs(5), || !frames.lock().unwrap().is_empty()));

        assert!(!engine.toggle());
        assert_eq!(engine.frame_counter(), 0);
        assert_eq!(engine.first_frame().unwrap().index, 0);

        // 可以再次播放
        assert!(engine.toggle());
        engine.cleanup();
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let mut engine = engine("stub://100000", fast_settings());
        engine.start();
        engine.cleanup();
        engine.cleanup();
        assert!(!engine.is_playing());
        assert!(!engine.is_loaded());
        assert_eq!(engine.video_info(), VideoInfo::default());
        assert!(engine.first_frame().is_none());
        assert!(!engine.start());
    }

    #[test]
    fn test_full_buffer_drops_without_blocking_reader() {
        let settings = PlaybackSettings {
            fps: 500.0,
            sample_stride: 1,
            buffer_capacity: 2,
            ..PlaybackSettings::default()
        };
        let mut engine = engine("stub://60", settings);
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        let slow = Duration::from_millis(50);
        engine.set_frame_callback(move |item| {
            thread::sleep(slow);
            sink.lock().unwrap().push(item.frame_number);
            Ok(())
        });
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        engine.set_state_observer(move |playing| {
            let _ = state_tx.send(playing);
        });

        let started = Instant::now();
        engine.start();
        assert_eq!(state_rx.recv_timeout(Duration::from_secs(5)), Ok(false));
        let elapsed = started.elapsed();
        engine.cleanup();

        // 读帧线程若等待回调, 至少需要 (60 - 容量) × 50ms
        assert!(elapsed < slow * 30, "reader blocked: {:?}", elapsed);

        let frames = frames.lock().unwrap();
        assert!(!frames.is_empty());
        assert!(frames.len() < 60, "no frame dropped: {}", frames.len());
        assert!(frames.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_start_with_zero_fps() {
        let settings = PlaybackSettings {
            fps: 0.0,
            ..PlaybackSettings::default()
        };
        let mut engine = engine("stub://3", settings);
        assert!(engine.start());
        engine.cleanup();
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_callback_failures_do_not_stop_delivery() {
        let mut engine = engine("stub://9", fast_settings());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.set_frame_callback(move |item| {
            sink.lock().unwrap().push(item.frame_number);
            match item.frame_number {
                3 => panic!("boom"),
                6 => Err(anyhow::anyhow!("detector busy")),
                _ => Ok(()),
            }
        });
        engine.start();
        assert!(wait_until(Duration::from_secs(5), || seen.lock().unwrap().len() == 3));
        assert_eq!(*seen.lock().unwrap(), vec![3, 6, 9]);
    }

    #[test]
    fn test_load_replaces_session() {
        let mut engine = engine("stub://100000", fast_settings());
        engine.start();
        let info = engine.load("stub://4?size=16x8").unwrap();
        assert!(!engine.is_playing());
        assert_eq!((info.width, info.height), (16, 8));
        assert_eq!(engine.video_info().frame_count, 4);
    }
}
