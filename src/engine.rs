use crate::config::{FallbackConfig, PlayerConfig};
use crate::process::{LaunchError, ProcessHandle};
use std::path::Path;
use tracing::{debug, info};

/// 低延迟播放参数：无控件、无缓存、最小探测、音频同步、固定解码线程、传输层自动重连
const LOW_LATENCY_ARGS: &[&str] = &[
    "--fullscreen",
    "--no-border",
    "--no-osc",
    "--no-input-default-bindings",
    "--really-quiet",
    "--no-terminal",
    "--no-input-terminal",
    "--force-window=immediate",
    "--keep-open=no",
    "--idle=no",
    "--profile=low-latency",
    "--untimed",
    "--cache=no",
    "--demuxer-lavf-o=fflags=+nobuffer+discardcorrupt",
    "--demuxer-lavf-analyzeduration=0.1",
    "--demuxer-lavf-probesize=32",
    "--video-sync=audio",
    "--interpolation=no",
    "--vd-lavc-threads=4",
    "--network-timeout=10",
    "--stream-lavf-o=reconnect=1,reconnect_streamed=1,reconnect_delay_max=2",
    "--audio-channels=stereo",
    "--volume=100",
];

const VIEWER_ARGS: &[&str] = &["--fullscreen", "--auto-zoom", "--hide-pointer"];

/// 启动播放器和回退图片查看器
///
/// 状态机只通过该接口访问输出设备，测试可替换为脚本进程。
pub trait Launcher: Send + Sync {
    fn launch_player(&self, url: &str) -> Result<ProcessHandle, LaunchError>;
    fn launch_viewer(&self, image: &Path) -> Result<ProcessHandle, LaunchError>;
}

pub struct Engine {
    player: PlayerConfig,
    fallback: FallbackConfig,
}

impl Engine {
    pub fn new(player: PlayerConfig, fallback: FallbackConfig) -> Self {
        Self { player, fallback }
    }

    /// 构建播放器命令行
    ///
    /// 输出直接绑定到 DRM 帧缓冲的指定接口和模式，不经过桌面环境。
    pub fn player_args(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = LOW_LATENCY_ARGS.iter().map(|a| a.to_string()).collect();

        if self.player.hardware_acceleration {
            args.push("--hwdec=drm".to_string());
        }

        args.push("--vo=drm".to_string());
        args.push(format!("--drm-connector={}", self.player.drm_connector));
        args.push(format!("--drm-mode={}", self.player.drm_mode));

        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    pub fn viewer_args(&self, image: &Path) -> Vec<String> {
        let mut args: Vec<String> = VIEWER_ARGS.iter().map(|a| a.to_string()).collect();
        args.push(image.to_string_lossy().into_owned());
        args
    }
}

impl Launcher for Engine {
    fn launch_player(&self, url: &str) -> Result<ProcessHandle, LaunchError> {
        info!("Starting player for [{}]", url);
        let handle = ProcessHandle::spawn("player", &self.player.binary, self.player_args(url), &[])?;
        debug!("{} {}", self.player.binary, handle.args().join(" "));
        Ok(handle)
    }

    fn launch_viewer(&self, image: &Path) -> Result<ProcessHandle, LaunchError> {
        let args = self.viewer_args(image);
        // 图片查看器需要 X 显示
        let mut envs = Vec::new();
        if std::env::var_os("DISPLAY").is_none() {
            envs.push(("DISPLAY", ":0".to_string()));
        }
        info!("Showing fallback image: {:?}", image);
        ProcessHandle::spawn("fallback viewer", &self.fallback.viewer_binary, args, &envs)
    }
}
