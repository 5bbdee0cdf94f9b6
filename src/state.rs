use crate::config::AppConfig;
use crate::fallback::FallbackController;
use crate::playback::Playback;
use crate::process::ProcessHandle;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Stopped,
    Starting,
    Playing,
    Reconnecting,
    Error,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackStatus::Stopped => "stopped",
            PlaybackStatus::Starting => "starting",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Reconnecting => "reconnecting",
            PlaybackStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// `Playback::status` 返回的原子快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: PlaybackStatus,
    pub current_stream: Option<String>,
    pub attempts: u32,
    pub fallback_active: bool,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Stopped,
            current_stream: None,
            attempts: 0,
            fallback_active: false,
        }
    }
}

/// 当前播放会话，由状态机的互斥锁保护
pub struct Session {
    /// 目标流地址
    pub url: Option<String>,
    /// 当前持有的播放器进程
    pub process: Option<ProcessHandle>,
    pub status: PlaybackStatus,
    /// 每次 play/stop 递增，用于让旧的健康监控任务失效
    pub generation: u64,
    /// 自上次确认健康以来的连续重连次数
    pub attempts: u32,
    pub fallback: FallbackController,
}

impl Session {
    pub fn new(fallback: FallbackController) -> Self {
        Self {
            url: None,
            process: None,
            status: PlaybackStatus::Stopped,
            generation: 0,
            attempts: 0,
            fallback,
        }
    }
}

/// 全局应用上下文
pub struct AppState {
    pub config: AppConfig,
    pub playback: Arc<Playback>,
}

pub type SharedState = Arc<AppState>;
