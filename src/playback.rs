use crate::config::Timing;
use crate::engine::Launcher;
use crate::fallback::FallbackController;
use crate::notify::StatusEvent;
use crate::process::{self, LaunchError};
use crate::state::{PlaybackStatus, Session, StatusSnapshot};
use crate::supervisor;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PlayError {
    #[error("no stream URL given")]
    InvalidUrl,
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// 播放状态机
///
/// `play`、`stop` 和健康监控的重启步骤都在 `session` 锁内执行，
/// `status` 只读取 watch 通道中的快照，不会等待这把锁。
pub struct Playback {
    pub(crate) session: Mutex<Session>,
    pub(crate) launcher: Arc<dyn Launcher>,
    pub(crate) timing: Timing,
    fallback_image: watch::Sender<Option<PathBuf>>,
    status_tx: watch::Sender<StatusSnapshot>,
    events: broadcast::Sender<StatusEvent>,
}

impl Playback {
    pub fn new(
        launcher: Arc<dyn Launcher>,
        timing: Timing,
        fallback_image: Option<PathBuf>,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        let (events, _) = broadcast::channel(64);
        let (fallback_image, _) = watch::channel(fallback_image);

        Arc::new(Self {
            session: Mutex::new(Session::new(FallbackController::new(launcher.clone()))),
            launcher,
            timing,
            fallback_image,
            status_tx,
            events,
        })
    }

    /// 当前状态快照，不会观察到转换中间态
    pub fn status(&self) -> StatusSnapshot {
        self.status_tx.borrow().clone()
    }

    /// 订阅状态变化事件
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    pub fn fallback_image(&self) -> Option<PathBuf> {
        self.fallback_image.borrow().clone()
    }

    /// 替换回退图片，下次显示回退画面时生效
    pub fn set_fallback_image(&self, image: PathBuf) {
        info!("Fallback image set to {:?}", image);
        self.fallback_image.send_replace(Some(image));
    }

    /// 切换到新的流
    ///
    /// 新进程在稳定窗口后确认存活，才结束旧进程 (无黑屏切换)。新进程提前退出时
    /// 状态变为 Error 并显示回退画面，旧进程同样被结束且不会恢复。
    pub async fn play(self: &Arc<Self>, url: &str) -> Result<(), PlayError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(PlayError::InvalidUrl);
        }

        let mut session = self.session.lock().await;
        session.generation += 1;
        let generation = session.generation;
        let outgoing = session.process.take();
        session.url = Some(url.to_string());
        session.attempts = 0;
        info!("Switching to stream [{}] (generation {})", url, generation);

        let mut handle = match self.launcher.launch_player(url) {
            Ok(handle) => handle,
            Err(e) => {
                self.retire(outgoing).await;
                self.show_fallback(&mut session);
                self.publish(&mut session, PlaybackStatus::Error);
                return Err(e.into());
            }
        };

        self.publish(&mut session, PlaybackStatus::Starting);
        tokio::time::sleep(self.timing.settle).await;

        if handle.is_alive() {
            session.process = Some(handle);
            self.retire(outgoing).await;
            session.fallback.hide(self.timing.terminate_grace).await;
            self.publish(&mut session, PlaybackStatus::Playing);
            tokio::spawn(supervisor::monitor_generation(Arc::clone(self), generation));
        } else {
            warn!(
                "Stream [{}] exited within settle window (code {:?})",
                url,
                handle.exit_code()
            );
            self.retire(outgoing).await;
            self.show_fallback(&mut session);
            self.publish(&mut session, PlaybackStatus::Error);
        }

        Ok(())
    }

    /// 停止播放并显示回退画面
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        session.generation += 1;
        info!(
            "Stopping stream (was {}, generation {})",
            session.status, session.generation
        );

        self.retire(session.process.take()).await;
        session.url = None;
        session.attempts = 0;
        self.show_fallback(&mut session);
        self.publish(&mut session, PlaybackStatus::Stopped);
    }

    /// 服务退出时释放输出设备，播放器和回退查看器都会被结束
    pub async fn shutdown(&self) {
        let mut session = self.session.lock().await;
        session.generation += 1;

        self.retire(session.process.take()).await;
        session.fallback.hide(self.timing.terminate_grace).await;
        session.url = None;
        session.attempts = 0;
        self.publish(&mut session, PlaybackStatus::Stopped);
        info!("Playback shut down");
    }

    async fn retire(&self, handle: Option<process::ProcessHandle>) {
        if let Some(mut handle) = handle {
            process::terminate(&mut handle, self.timing.terminate_grace).await;
        }
    }

    pub(crate) fn show_fallback(&self, session: &mut Session) {
        let image = self.fallback_image();
        session.fallback.show(image.as_deref());
    }

    /// 写入状态并发布快照
    pub(crate) fn publish(&self, session: &mut Session, status: PlaybackStatus) {
        session.status = status;
        let snapshot = StatusSnapshot {
            status,
            current_stream: session.url.clone(),
            attempts: session.attempts,
            fallback_active: session.fallback.is_active(),
        };
        info!(
            "Playback status: {} (stream: {:?}, attempts: {})",
            status, snapshot.current_stream, snapshot.attempts
        );
        self.status_tx.send_replace(snapshot.clone());
        let _ = self.events.send(StatusEvent::new(snapshot));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fallback::tests::ScriptLauncher;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    pub fn test_timing(max_attempts: u32) -> Timing {
        Timing {
            settle: Duration::from_millis(300),
            poll_interval: Duration::from_millis(100),
            reconnect_delay: Duration::from_millis(50),
            terminate_grace: Duration::from_secs(1),
            max_attempts,
        }
    }

    pub fn setup(
        launcher: ScriptLauncher,
        max_attempts: u32,
    ) -> (Arc<Playback>, Arc<ScriptLauncher>, NamedTempFile) {
        let image = NamedTempFile::new().unwrap();
        let launcher = Arc::new(launcher);
        let playback = Playback::new(
            launcher.clone(),
            test_timing(max_attempts),
            Some(image.path().to_path_buf()),
        );
        (playback, launcher, image)
    }

    pub async fn player_pid(playback: &Playback) -> Option<u32> {
        let session = playback.session.lock().await;
        session.process.as_ref().and_then(|p| p.pid())
    }

    pub fn pid_alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    /// 收集事件直到满足条件，超时则失败
    pub async fn wait_for<F>(
        rx: &mut broadcast::Receiver<StatusEvent>,
        mut done: F,
    ) -> Vec<StatusSnapshot>
    where
        F: FnMut(&StatusSnapshot) -> bool,
    {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let event = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .expect("timed out waiting for status")
                .unwrap();
            let finished = done(&event.snapshot);
            seen.push(event.snapshot);
            if finished {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn test_play_healthy_stream() {
        let (playback, _launcher, _image) = setup(ScriptLauncher::default(), 10);
        let mut rx = playback.subscribe();
        assert_eq!(playback.status(), StatusSnapshot::default());

        playback.play("rtsp://cam1").await.unwrap();

        let status = playback.status();
        assert_eq!(status.status, PlaybackStatus::Playing);
        assert_eq!(status.current_stream.as_deref(), Some("rtsp://cam1"));
        assert!(!status.fallback_active);

        let seen: Vec<_> = wait_for(&mut rx, |s| s.status == PlaybackStatus::Playing)
            .await
            .into_iter()
            .map(|s| s.status)
            .collect();
        assert_eq!(seen, [PlaybackStatus::Starting, PlaybackStatus::Playing]);

        playback.shutdown().await;
    }

    #[tokio::test]
    async fn test_play_immediate_crash_keeps_failing_url() {
        let (playback, _launcher, _image) = setup(ScriptLauncher::default(), 10);

        playback.play("rtsp://bad").await.unwrap();

        let status = playback.status();
        assert_eq!(status.status, PlaybackStatus::Error);
        assert_eq!(status.current_stream.as_deref(), Some("rtsp://bad"));
        assert!(status.fallback_active);
        assert!(player_pid(&playback).await.is_none());

        playback.shutdown().await;
    }

    #[tokio::test]
    async fn test_play_empty_url_is_rejected_without_state_change() {
        let (playback, launcher, _image) = setup(ScriptLauncher::default(), 10);

        assert!(matches!(playback.play("   ").await, Err(PlayError::InvalidUrl)));
        assert_eq!(playback.status(), StatusSnapshot::default());
        assert_eq!(launcher.player_launches.load(Ordering::SeqCst), 0);
        assert_eq!(launcher.viewer_launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_launch_error_shows_fallback() {
        let launcher = ScriptLauncher {
            fail_spawn_after: Some(0),
            ..ScriptLauncher::default()
        };
        let (playback, _launcher, _image) = setup(launcher, 10);

        let result = playback.play("rtsp://cam1").await;
        assert!(matches!(result, Err(PlayError::Launch(_))));

        let status = playback.status();
        assert_eq!(status.status, PlaybackStatus::Error);
        assert_eq!(status.current_stream.as_deref(), Some("rtsp://cam1"));
        assert!(status.fallback_active);

        playback.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_while_playing() {
        let (playback, launcher, _image) = setup(ScriptLauncher::default(), 10);
        playback.play("rtsp://cam1").await.unwrap();
        let pid = player_pid(&playback).await.unwrap();

        playback.stop().await;

        let status = playback.status();
        assert_eq!(status.status, PlaybackStatus::Stopped);
        assert!(status.current_stream.is_none());
        assert!(status.fallback_active);
        assert!(!pid_alive(pid));
        assert_eq!(launcher.viewer_launches.load(Ordering::SeqCst), 1);

        playback.shutdown().await;
        assert!(!playback.status().fallback_active);
    }

    #[tokio::test]
    async fn test_seamless_handover() {
        let (playback, launcher, _image) = setup(ScriptLauncher::default(), 10);
        playback.stop().await;
        assert!(playback.status().fallback_active);

        let mut rx = playback.subscribe();
        playback.play("rtsp://cam1").await.unwrap();
        let first = player_pid(&playback).await.unwrap();

        playback.play("rtsp://cam2").await.unwrap();
        let second = player_pid(&playback).await.unwrap();

        assert_ne!(first, second);
        assert!(!pid_alive(first));
        assert!(pid_alive(second));
        assert_eq!(launcher.player_launches.load(Ordering::SeqCst), 2);

        let status = playback.status();
        assert_eq!(status.status, PlaybackStatus::Playing);
        assert_eq!(status.current_stream.as_deref(), Some("rtsp://cam2"));

        let seen = wait_for(&mut rx, |s| {
            s.status == PlaybackStatus::Playing && s.current_stream.as_deref() == Some("rtsp://cam2")
        })
        .await;
        // 第二次切换同样经过 Starting
        assert_eq!(
            seen.iter()
                .filter(|s| s.status == PlaybackStatus::Starting)
                .count(),
            2
        );
        assert!(seen
            .iter()
            .all(|s| !(s.status == PlaybackStatus::Playing && s.fallback_active)));

        playback.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_switch_does_not_restore_previous_stream() {
        let (playback, _launcher, _image) = setup(ScriptLauncher::default(), 10);
        playback.play("rtsp://cam1").await.unwrap();
        let first = player_pid(&playback).await.unwrap();

        playback.play("rtsp://bad").await.unwrap();

        // 旧流已被结束，画面交给回退图片，而不是回滚到 cam1
        let status = playback.status();
        assert_eq!(status.status, PlaybackStatus::Error);
        assert_eq!(status.current_stream.as_deref(), Some("rtsp://bad"));
        assert!(status.fallback_active);
        assert!(!pid_alive(first));
        assert!(player_pid(&playback).await.is_none());

        playback.shutdown().await;
    }

    #[tokio::test]
    async fn test_single_owner_after_rapid_switches() {
        let (playback, launcher, _image) = setup(ScriptLauncher::default(), 10);

        let mut pids = Vec::new();
        for url in ["rtsp://cam1", "rtsp://cam2", "rtsp://cam3"] {
            playback.play(url).await.unwrap();
            pids.push(player_pid(&playback).await.unwrap());
        }

        let alive: Vec<_> = pids.iter().filter(|pid| pid_alive(**pid)).collect();
        assert_eq!(alive, [&pids[2]]);
        assert_eq!(launcher.player_launches.load(Ordering::SeqCst), 3);

        playback.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_play_and_stop_are_serialized() {
        let (playback, _launcher, _image) = setup(ScriptLauncher::default(), 10);

        let mut rx = playback.subscribe();

        let p = playback.clone();
        let play = tokio::spawn(async move { p.play("rtsp://cam1").await });
        // play 已持有会话锁并进入稳定窗口
        wait_for(&mut rx, |s| s.status == PlaybackStatus::Starting).await;
        playback.stop().await;
        play.await.unwrap().unwrap();

        // stop 在 play 完成后才执行，最终没有播放器存活
        let seen: Vec<_> = wait_for(&mut rx, |s| s.status == PlaybackStatus::Stopped)
            .await
            .into_iter()
            .map(|s| s.status)
            .collect();
        assert_eq!(seen, [PlaybackStatus::Playing, PlaybackStatus::Stopped]);
        assert_eq!(playback.status().status, PlaybackStatus::Stopped);
        assert!(player_pid(&playback).await.is_none());

        playback.shutdown().await;
    }
}
