use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub streams: StreamsConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen: String,

    /// 上传文件 (回退图片) 的存储目录
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
}

/// 播放器进程配置
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PlayerConfig {
    pub binary: String,
    /// 是否启用硬件解码
    pub hardware_acceleration: bool,
    /// DRM 输出接口，例如 HDMI-A-1
    pub drm_connector: String,
    /// DRM 输出模式，例如 1920x1080
    pub drm_mode: String,
    /// 启动后等待多久才判断进程存活 (毫秒)
    pub settle_ms: u64,
    /// 存活轮询间隔 (毫秒)
    pub poll_interval_ms: u64,
    /// SIGTERM 之后等待的宽限期 (毫秒)，超时则 SIGKILL
    pub terminate_grace_ms: u64,
    /// 故障重连策略
    pub reconnect: ReconnectPolicy,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            binary: "mpv".to_string(),
            hardware_acceleration: true,
            drm_connector: "HDMI-A-1".to_string(),
            drm_mode: "1920x1080".to_string(),
            settle_ms: 1000,
            poll_interval_ms: 1000,
            terminate_grace_ms: 2000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// 最大连续重连次数
    pub max_attempts: u32,
    /// 每次重连前的固定等待时间 (毫秒)
    pub delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FallbackConfig {
    pub viewer_binary: String,
    /// 无流可播时全屏显示的静态图片
    pub image: Option<PathBuf>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            viewer_binary: "feh".to_string(),
            image: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StreamsConfig {
    /// 启动时自动播放的流
    pub default_stream: Option<String>,
    /// 流目录
    pub custom: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotifyConfig {
    pub topic_prefix: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "streamdisplay".to_string(),
        }
    }
}

/// 播放监督器使用的时间参数
#[derive(Debug, Clone)]
pub struct Timing {
    pub settle: Duration,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub terminate_grace: Duration,
    pub max_attempts: u32,
}

impl PlayerConfig {
    pub fn timing(&self) -> Timing {
        Timing {
            settle: Duration::from_millis(self.settle_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            reconnect_delay: Duration::from_millis(self.reconnect.delay_ms),
            terminate_grace: Duration::from_millis(self.terminate_grace_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }
}

fn default_uploads_dir() -> String {
    "./uploads".to_string()
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// 按 ID 在流目录中查找流地址
    pub fn find_stream(&self, id: &str) -> Option<&StreamEntry> {
        self.streams.custom.iter().find(|s| s.id == id)
    }
}
