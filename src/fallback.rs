use crate::engine::Launcher;
use crate::process::{self, ProcessHandle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// 无流可播时在输出设备上全屏显示静态图片
///
/// 与健康播放器的互斥由状态机保证，这里不做检查。
pub struct FallbackController {
    launcher: Arc<dyn Launcher>,
    process: Option<ProcessHandle>,
}

impl FallbackController {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            process: None,
        }
    }

    pub fn is_active(&mut self) -> bool {
        self.process.as_mut().is_some_and(|p| p.is_alive())
    }

    /// 显示回退图片；未配置或文件不存在时什么也不做
    pub fn show(&mut self, image: Option<&Path>) {
        if self.is_active() {
            return;
        }

        let Some(image) = image else {
            debug!("No fallback image configured");
            return;
        };
        if !image.exists() {
            warn!("Fallback image {:?} does not exist", image);
            return;
        }

        match self.launcher.launch_viewer(image) {
            Ok(handle) => self.process = Some(handle),
            Err(e) => error!("Failed to show fallback image: {}", e),
        }
    }

    pub async fn hide(&mut self, grace: Duration) {
        if let Some(mut handle) = self.process.take() {
            process::terminate(&mut handle, grace).await;
            debug!("Fallback viewer stopped");
        }
    }
}
