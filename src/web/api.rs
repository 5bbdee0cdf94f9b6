use crate::config::StreamEntry;
use crate::playback::PlayError;
use crate::state::{SharedState, StatusSnapshot};
use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use tracing::{error, info};

/// 提供内嵌的控制页面
pub async fn index_handler() -> axum::response::Html<&'static str> {
    axum::response::Html(include_str!("../../static/index.html"))
}

/// 当前播放状态
pub async fn get_status(State(state): State<SharedState>) -> Json<StatusSnapshot> {
    Json(state.playback.status())
}

#[derive(Debug, Deserialize, Default)]
pub struct PlayRequest {
    pub url: Option<String>,
    /// 流目录中的 ID，优先于 url
    pub stream_id: Option<String>,
}

/// 播放指定的流
///
/// 切换在独立任务中执行，客户端断开连接不会中断切换流程。
pub async fn handle_play(
    State(state): State<SharedState>,
    Json(req): Json<PlayRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let url = req
        .stream_id
        .as_deref()
        .and_then(|id| state.config.find_stream(id))
        .map(|s| s.url.clone())
        .or(req.url)
        .unwrap_or_default();

    info!("Play requested: [{}]", url);
    let playback = state.playback.clone();
    let target = url.clone();
    let result = tokio::spawn(async move { playback.play(&target).await }).await;

    match result {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "url": url,
                "status": state.playback.status(),
            })),
        ),
        Ok(Err(e)) => {
            let code = match e {
                PlayError::InvalidUrl => StatusCode::BAD_REQUEST,
                PlayError::Launch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                code,
                Json(serde_json::json!({ "success": false, "error": e.to_string() })),
            )
        }
        Err(e) => {
            error!("Play task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "success": false, "error": e.to_string() })),
            )
        }
    }
}

/// 停止播放
pub async fn handle_stop(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let playback = state.playback.clone();
    if let Err(e) = tokio::spawn(async move { playback.stop().await }).await {
        error!("Stop task failed: {}", e);
    }

    Json(serde_json::json!({
        "success": true,
        "status": state.playback.status(),
    }))
}

/// 流目录
pub async fn list_streams(State(state): State<SharedState>) -> Json<Vec<StreamEntry>> {
    Json(state.config.streams.custom.clone())
}

/// 获取系统信息 API
/// 返回主机名、内存和负载信息
/// 系统运行时间 (秒)
#[cfg(any(target_os = "linux", target_os = "android"))]
fn uptime_secs() -> Option<u64> {
    // Linux 上 boottime 返回的是 /proc/uptime 中的运行时长
    sys_info::boottime().ok().map(|t| t.tv_sec.max(0) as u64)
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn uptime_secs() -> Option<u64> {
    let boot = sys_info::boottime().ok()?;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?;
    now.as_secs().checked_sub(boot.tv_sec.max(0) as u64)
}

#[cfg(not(unix))]
fn uptime_secs() -> Option<u64> {
    None
}

pub async fn system_info() -> Json<serde_json::Value> {
    let hostname = sys_info::hostname().unwrap_or_default();
    // 获取内存信息，默认值为 0
    let mem = sys_info::mem_info().map(|m| (m.total, m.avail)).unwrap_or((0, 0));
    // 获取负载信息，默认值为 0.0
    let load = sys_info::loadavg().map(|l| l.one).unwrap_or(0.0);

    Json(serde_json::json!({
        "hostname": hostname,
        "mem_total": mem.0 / 1024, // 转换为MB
        "mem_avail": mem.1 / 1024, // 转换为MB
        "load_avg": load,
        "uptime_secs": uptime_secs(),
    }))
}
