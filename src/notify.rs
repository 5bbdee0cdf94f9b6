use crate::state::StatusSnapshot;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 每次状态变化发出的事件，携带完整快照，重复投递无副作用
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
    /// UNIX 时间戳 (秒)
    pub timestamp: f64,
}

impl StatusEvent {
    pub fn new(snapshot: StatusSnapshot) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            snapshot,
            timestamp,
        }
    }
}

/// 将状态事件以保留消息的形式发布到 `<prefix>/status`
///
/// 消息总线传输不在本服务内，这里以 JSON 日志输出。
pub async fn publish_status_events(mut rx: broadcast::Receiver<StatusEvent>, topic_prefix: String) {
    let topic = format!("{}/status", topic_prefix);

    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(payload) => info!("Publish [{}] (retained): {}", topic, payload),
                Err(e) => error!("Failed to encode status event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // 每个事件都是完整快照，丢掉的只是中间状态
                warn!("Status publisher lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
