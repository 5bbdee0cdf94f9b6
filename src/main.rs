mod config;
mod engine;
mod fallback;
mod notify;
mod playback;
mod process;
mod state;
mod supervisor;
mod web;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use clap::Parser;
use config::AppConfig;
use engine::Engine;
use playback::Playback;
use state::AppState;
use std::sync::Arc;
use tracing::{error, info};

/// Stream Display - 单屏实时视频流显示服务
/// 解析命令行参数，加载配置文件，启动播放监督器和 HTTP 控制接口
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "stream-display.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;
    info!(
        "Stream Display initialized. Player: {}, output: {} @ {}",
        config.player.binary, config.player.drm_connector, config.player.drm_mode
    );

    let launcher = Arc::new(Engine::new(config.player.clone(), config.fallback.clone()));
    let playback = Playback::new(
        launcher,
        config.player.timing(),
        config.fallback.image.clone(),
    );

    // 状态事件发布任务
    tokio::spawn(notify::publish_status_events(
        playback.subscribe(),
        config.notify.topic_prefix.clone(),
    ));

    // 播放默认流，没有则显示回退画面
    match config
        .streams
        .default_stream
        .as_deref()
        .filter(|url| !url.trim().is_empty())
    {
        Some(url) => {
            info!("Starting default stream: {}", url);
            if let Err(e) = playback.play(url).await {
                error!("Default stream failed: {}", e);
            }
        }
        None => playback.stop().await,
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        playback: playback.clone(),
    });

    // 注册HTTP路由
    let app = Router::new()
        .route("/", get(web::api::index_handler)) // 控制页面
        .route("/api/status", get(web::api::get_status))
        .route("/api/play", post(web::api::handle_play))
        .route("/api/stop", post(web::api::handle_stop))
        .route("/api/streams", get(web::api::list_streams)) // 流目录
        .route("/api/system/info", get(web::api::system_info))
        .route(
            "/api/fallback/:file_name",
            put(web::uploads::upload_fallback)
                .layer(DefaultBodyLimit::max(web::uploads::MAX_UPLOAD_BYTES)),
        )
        .route("/uploads/:file_name", get(web::uploads::serve_upload))
        .with_state(state);

    info!("Listening on {}", config.server.listen);
    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 释放输出设备
    playback.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
