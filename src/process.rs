use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// 操作系统层面的进程创建失败 (程序不存在、无权限等)
///
/// 进程创建成功但立即退出不属于此错误，存活与否只在稳定窗口之后判断。
#[derive(Debug, Error)]
#[error("failed to spawn {program}: {source}")]
pub struct LaunchError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// 对单个外部进程 (播放器或回退图片查看器) 的封装
pub struct ProcessHandle {
    label: &'static str,
    pid: Option<u32>,
    args: Vec<String>,
    child: Child,
}

impl ProcessHandle {
    /// 在独立进程组中启动进程，标准输入输出全部丢弃
    pub fn spawn(
        label: &'static str,
        program: &str,
        args: Vec<String>,
        envs: &[(&str, String)],
    ) -> Result<Self, LaunchError> {
        let mut cmd = Command::new(program);
        cmd.args(&args);
        for (key, value) in envs {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn {} process [{}]: {}", label, program, e);
            LaunchError {
                program: program.to_string(),
                source: e,
            }
        })?;

        let pid = child.id();
        info!("{} started (PID: {:?})", label, pid);

        Ok(Self {
            label,
            pid,
            args,
            child,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// 进程已退出时返回退出码 (被信号终止时为 None)
    pub fn exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => status.code(),
            _ => None,
        }
    }

    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                // 无法查询时视为已退出，交给上层重连
                error!("Process monitor error [{}]: {}", self.label, e);
                false
            }
        }
    }

    /// 进程组中是否还有进程 (包括已退出组长留下的子进程)
    #[cfg(unix)]
    fn group_alive(&self) -> bool {
        self.pid
            .is_some_and(|pid| unsafe { libc::killpg(pid as libc::pid_t, 0) } == 0)
    }

    #[cfg(not(unix))]
    fn group_alive(&mut self) -> bool {
        self.is_alive()
    }

    fn signal_group(&mut self, signal: i32) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            // pgid == pid，因为启动时设置了 process_group(0)
            let rc = unsafe { libc::killpg(pid as libc::pid_t, signal) };
            if rc != 0 {
                debug!(
                    "killpg({}, {}) failed: {}",
                    pid,
                    signal,
                    std::io::Error::last_os_error()
                );
            }
            return;
        }
        let _ = signal;
        let _ = self.child.start_kill();
    }
}

/// SIGKILL 之后等待组内非子进程被回收的上限
const KILL_SETTLE_TIMEOUT: Duration = Duration::from_secs(1);
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 先发送 SIGTERM 给整个进程组，宽限期内组内仍有进程存活则 SIGKILL
///
/// 组长退出不代表整个进程组退出，判断以 `killpg(pgid, 0)` 为准。
/// 整个进程组都已退出时直接返回。
pub async fn terminate(handle: &mut ProcessHandle, grace: Duration) {
    if !handle.is_alive() && !handle.group_alive() {
        return;
    }

    #[cfg(unix)]
    handle.signal_group(libc::SIGTERM);
    #[cfg(not(unix))]
    handle.signal_group(15);

    let deadline = tokio::time::Instant::now() + grace;
    let leader_exited = match tokio::time::timeout_at(deadline, handle.child.wait()).await {
        Ok(status) => {
            debug!("{} (PID: {:?}) exited: {:?}", handle.label, handle.pid, status);
            true
        }
        Err(_) => false,
    };

    // 组长已退出，剩余宽限期内等待组内其他进程
    while leader_exited && handle.group_alive() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(GROUP_POLL_INTERVAL).await;
    }

    if !leader_exited || handle.group_alive() {
        warn!(
            "{} (PID: {:?}) process group ignored SIGTERM for {:?}, killing",
            handle.label, handle.pid, grace
        );
        #[cfg(unix)]
        handle.signal_group(libc::SIGKILL);
        #[cfg(not(unix))]
        handle.signal_group(9);
        let _ = handle.child.wait().await;

        // 组内其他进程由 init 回收，这里只做有限等待
        let kill_deadline = tokio::time::Instant::now() + KILL_SETTLE_TIMEOUT;
        while handle.group_alive() && tokio::time::Instant::now() < kill_deadline {
            tokio::time::sleep(GROUP_POLL_INTERVAL).await;
        }
        if handle.group_alive() {
            debug!(
                "{} (PID: {:?}) process group still listed after SIGKILL",
                handle.label, handle.pid
            );
        }
    }
}
