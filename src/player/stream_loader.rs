//! 网络流异步加载
//!
//! 获取步骤在工作线程执行，结果通过消息通道回到拥有者线程，由 [`StreamLoader::poll`]
//! 统一应用。工作线程从不直接修改加载状态；超时和取消只置位取消标志，
//! 迟到的结果在拥有者线程丢弃（连同其中的句柄一起释放）。

use crate::core::clock::TimeSource;
use crate::core::SourceLocation;
use crate::player::media_source::MediaSource;
use crate::player::source_acquirer::{run_acquisition, AcquireOutcome, AcquireStep, SourceAcquirer};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 默认加载超时
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_millis(15_000);
/// 时间估算进度的上报间隔
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// 加载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingStatus {
    Idle,
    Connecting,
    LoadingStreamInfo,
    Ready,
    Failed,
    Timeout,
    Cancelled,
}

impl LoadingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoadingStatus::Ready | LoadingStatus::Failed | LoadingStatus::Timeout | LoadingStatus::Cancelled
        )
    }

    pub fn text(&self) -> &'static str {
        match self {
            LoadingStatus::Idle => "等待",
            LoadingStatus::Connecting => "连接中",
            LoadingStatus::LoadingStreamInfo => "加载流信息",
            LoadingStatus::Ready => "就绪",
            LoadingStatus::Failed => "失败",
            LoadingStatus::Timeout => "超时",
            LoadingStatus::Cancelled => "已取消",
        }
    }
}

/// 工作线程 → 拥有者线程的消息
enum LoaderMessage {
    Step { session: u64, step: AcquireStep },
    Finished { session: u64, outcome: AcquireOutcome },
}

/// 应用到拥有者线程后产生的加载事件
#[derive(Debug)]
pub enum LoaderEvent {
    Started { session: u64 },
    Progress { session: u64, percent: u8, message: String },
    Ready { session: u64, source: MediaSource },
    Failed { session: u64, reason: String },
    Timeout { session: u64 },
    Cancelled { session: u64 },
}

/// 一次加载会话
#[derive(Debug)]
pub struct LoadingSession {
    id: u64,
    location: SourceLocation,
    status: LoadingStatus,
    history: Vec<LoadingStatus>,
    cancel: Arc<AtomicBool>,
    started_at: Instant,
    timeout: Duration,
}

impl LoadingSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    pub fn status(&self) -> LoadingStatus {
        self.status
    }

    /// 经历过的状态（按顺序）
    pub fn history(&self) -> &[LoadingStatus] {
        &self.history
    }

    pub fn deadline(&self) -> Instant {
        self.started_at + self.timeout
    }

    /// 终态之后不再迁移，返回迁移是否生效
    fn transition(&mut self, next: LoadingStatus) -> bool {
        if self.status.is_terminal() || self.status == next {
            return false;
        }
        debug!("加载会话 #{}: {:?} → {:?}", self.id, self.status, next);
        self.status = next;
        self.history.push(next);
        true
    }
}

/// 网络流加载器
pub struct StreamLoader {
    acquirer: SourceAcquirer,
    time: Arc<dyn TimeSource>,
    session: Option<LoadingSession>,
    next_id: u64,
    tx: Sender<LoaderMessage>,
    rx: Receiver<LoaderMessage>,
}

impl StreamLoader {
    pub fn new(acquirer: SourceAcquirer, time: Arc<dyn TimeSource>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            acquirer,
            time,
            session: None,
            next_id: 1,
            tx,
            rx,
        }
    }

    pub fn session(&self) -> Option<&LoadingSession> {
        self.session.as_ref()
    }

    pub fn status(&self) -> LoadingStatus {
        self.session
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(LoadingStatus::Idle)
    }

    pub fn status_text(&self) -> &'static str {
        self.status().text()
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self.status(),
            LoadingStatus::Connecting | LoadingStatus::LoadingStreamInfo
        )
    }

    /// 开始加载；进行中的会话先被取消
    pub fn begin(&mut self, location: SourceLocation, timeout: Duration) -> Vec<LoaderEvent> {
        let mut events = Vec::new();
        events.extend(self.cancel());

        let id = self.next_id;
        self.next_id += 1;
        let cancel = Arc::new(AtomicBool::new(false));
        info!("🌐 开始加载 #{}: {} (超时 {}ms)", id, location.as_display(), timeout.as_millis());

        let mut session = LoadingSession {
            id,
            location: location.clone(),
            status: LoadingStatus::Idle,
            history: vec![LoadingStatus::Idle],
            cancel: cancel.clone(),
            started_at: self.time.now(),
            timeout,
        };
        session.transition(LoadingStatus::Connecting);
        events.push(LoaderEvent::Started { session: id });

        let steps = self.acquirer.prepare(&location, cancel.clone());
        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("stream-loader-{}", id))
            .spawn(move || {
                let step_tx = tx.clone();
                let outcome = run_acquisition(steps, &cancel, |step| {
                    let _ = step_tx.send(LoaderMessage::Step { session: id, step });
                });
                // 拥有者已经离开时结果直接丢弃
                let _ = tx.send(LoaderMessage::Finished { session: id, outcome });
            });

        if let Err(e) = spawned {
            error!("❌ 无法启动加载线程: {}", e);
            session.transition(LoadingStatus::Failed);
            events.push(LoaderEvent::Failed {
                session: id,
                reason: format!("无法启动加载线程: {}", e),
            });
        }

        self.session = Some(session);
        events
    }

    /// 应用工作线程发来的全部消息
    pub fn poll(&mut self) -> Vec<LoaderEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            match message {
                LoaderMessage::Step { session, step } => self.apply_step(session, step, &mut events),
                LoaderMessage::Finished { session, outcome } => {
                    self.apply_outcome(session, outcome, &mut events)
                }
            }
        }
        events
    }

    fn active_session(&mut self, id: u64) -> Option<&mut LoadingSession> {
        self.session
            .as_mut()
            .filter(|s| s.id == id && !s.status.is_terminal())
    }

    fn apply_step(&mut self, id: u64, step: AcquireStep, events: &mut Vec<LoaderEvent>) {
        let Some(session) = self.active_session(id) else {
            return;
        };
        match step {
            AcquireStep::StreamInfo | AcquireStep::OpeningDecoders => {
                session.transition(LoadingStatus::LoadingStreamInfo);
            }
            AcquireStep::Connecting | AcquireStep::Probing => {
                session.transition(LoadingStatus::Connecting);
            }
            AcquireStep::Connected => {}
        }
        if let Some((percent, message)) = step.milestone() {
            events.push(LoaderEvent::Progress {
                session: id,
                percent,
                message: message.to_string(),
            });
        }
    }

    fn apply_outcome(&mut self, id: u64, outcome: AcquireOutcome, events: &mut Vec<LoaderEvent>) {
        let Some(session) = self.active_session(id) else {
            if let AcquireOutcome::Ready(source) = outcome {
                debug!("丢弃过期的加载结果 #{}: {}", id, source.location);
            }
            return;
        };

        match outcome {
            AcquireOutcome::Ready(source) => {
                session.transition(LoadingStatus::Ready);
                info!("✅ 加载完成 #{}: {}", id, source.location);
                events.push(LoaderEvent::Ready { session: id, source });
            }
            AcquireOutcome::Failed(e) => {
                session.transition(LoadingStatus::Failed);
                warn!("❌ 加载失败 #{}: {}", id, e);
                events.push(LoaderEvent::Failed {
                    session: id,
                    reason: e.to_string(),
                });
            }
            AcquireOutcome::Cancelled => {
                session.transition(LoadingStatus::Cancelled);
                info!("加载已取消 #{}", id);
                events.push(LoaderEvent::Cancelled { session: id });
            }
        }
    }

    /// 取消进行中的会话
    pub fn cancel(&mut self) -> Option<LoaderEvent> {
        let session = self.session.as_mut().filter(|s| !s.status.is_terminal())?;
        session.cancel.store(true, Ordering::SeqCst);
        session.transition(LoadingStatus::Cancelled);
        info!("⏹️ 取消加载 #{}", session.id);
        Some(LoaderEvent::Cancelled { session: session.id })
    }

    /// 超时定时器到期
    pub fn on_timeout(&mut self, id: u64) -> Option<LoaderEvent> {
        let session = self.active_session(id)?;
        session.cancel.store(true, Ordering::SeqCst);
        session.transition(LoadingStatus::Timeout);
        warn!(
            "⏰ 加载超时 #{}: {} ({}ms)",
            id,
            session.location.as_display(),
            session.timeout.as_millis()
        );
        Some(LoaderEvent::Timeout { session: id })
    }

    /// 按已用时间估算进度（仅用于显示）
    pub fn progress_estimate(&self) -> Option<(u8, &'static str)> {
        let session = self.session.as_ref().filter(|s| !s.status.is_terminal())?;
        let elapsed = self.time.now().saturating_duration_since(session.started_at);
        let expected = session.timeout.as_secs_f64() * 0.8;
        let percent = if expected > 0.0 {
            (elapsed.as_secs_f64() * 90.0 / expected).min(90.0) as u8
        } else {
            90
        };
        let message = match session.status {
            LoadingStatus::Connecting => "正在连接网络流...",
            LoadingStatus::LoadingStreamInfo => "正在分析视频信息...",
            _ => "正在加载...",
        };
        Some((percent, message))
    }
}

impl Drop for StreamLoader {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.cancel.store(true, Ordering::SeqCst);
        }
    }
}
