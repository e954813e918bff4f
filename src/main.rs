//! Hive 网关入口：加载配置、组装组件、运行直到收到关闭信号
//!
//! 用法：`hive [config.toml]`，环境变量 `HIVE__*` 可覆盖任意配置项。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hive::{config::load_config, observability, GatewayBuilder, ShutdownManager};

/// 关闭时每个阶段（运行收尾、路由、通道）的最长等待时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load configuration")?;

    let gateway = GatewayBuilder::new(config)
        .build()
        .context("Failed to build gateway")?;
    tracing::info!(
        workspace = %gateway.workspace().display(),
        channels = ?gateway.channel_names(),
        "gateway ready"
    );

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let running = gateway.start(&shutdown);
    shutdown.wait_for_shutdown().await;

    if !running.stop(&shutdown, SHUTDOWN_GRACE).await {
        tracing::warn!("some runs did not finish within the grace period");
    }
    tracing::info!("bye");
    Ok(())
}
