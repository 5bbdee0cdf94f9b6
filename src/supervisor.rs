use crate::playback::Playback;
use crate::state::PlaybackStatus;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 单个播放代的健康监控任务
///
/// # 任务流程：
/// - 每隔固定间隔检查播放器进程是否存活
/// - 进程退出且未超过最大重连次数时，等待固定延迟后用同一地址重新启动
/// - 重启后等待稳定窗口，进程仍存活则回到 Playing 并清零重连计数
/// - 重连次数耗尽时进入 Error 并显示回退画面，任务结束
/// - 每次加锁后都检查代号，已被新的 play/stop 取代则立即退出，不再触碰进程
pub async fn monitor_generation(playback: Arc<Playback>, generation: u64) {
    let timing = playback.timing.clone();
    // 重启后未通过稳定窗口时跳过轮询等待，直接进入下一次重连
    let mut recheck = false;

    loop {
        if !recheck {
            tokio::time::sleep(timing.poll_interval).await;
        }
        recheck = false;

        // --- 阶段 1: 检查进程状态 ---
        let url = {
            let mut session = playback.session.lock().await;
            if session.generation != generation {
                debug!("Monitor for generation {} superseded", generation);
                return;
            }

            let exit_code = match session.process.as_mut() {
                Some(process) => {
                    if process.is_alive() {
                        continue;
                    }
                    process.exit_code()
                }
                None => None,
            };
            warn!("Player exited unexpectedly (code {:?})", exit_code);
            session.process = None;

            if session.attempts >= timing.max_attempts {
                error!(
                    "Reached max reconnect attempts ({}). Giving up.",
                    timing.max_attempts
                );
                playback.show_fallback(&mut session);
                playback.publish(&mut session, PlaybackStatus::Error);
                return;
            }

            session.attempts += 1;
            info!(
                "Reconnect attempt {}/{}",
                session.attempts, timing.max_attempts
            );
            playback.publish(&mut session, PlaybackStatus::Reconnecting);

            match session.url.clone() {
                Some(url) => url,
                None => return,
            }
        };

        // --- 阶段 2: 固定延迟后重启 ---
        tokio::time::sleep(timing.reconnect_delay).await;
        {
            let mut session = playback.session.lock().await;
            if session.generation != generation {
                debug!("Monitor for generation {} superseded", generation);
                return;
            }

            match playback.launcher.launch_player(&url) {
                Ok(handle) => session.process = Some(handle),
                Err(e) => {
                    error!("Reconnect failed [{}]: {}", url, e);
                    recheck = true;
                    continue;
                }
            }
        }

        // --- 阶段 3: 稳定窗口后确认 ---
        tokio::time::sleep(timing.settle).await;
        {
            let mut session = playback.session.lock().await;
            if session.generation != generation {
                debug!("Monitor for generation {} superseded", generation);
                return;
            }

            let alive = session.process.as_mut().is_some_and(|p| p.is_alive());
            if alive {
                session.attempts = 0;
                session.fallback.hide(timing.terminate_grace).await;
                playback.publish(&mut session, PlaybackStatus::Playing);
                let pid = session.process.as_ref().and_then(|p| p.pid());
                info!("Stream [{}] reconnected (PID: {:?})", url, pid);
            } else {
                warn!("Stream [{}] exited again within settle window", url);
                recheck = true;
            }
        }
    }
}
