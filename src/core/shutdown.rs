//! 优雅关闭
//!
//! ShutdownManager 持有根 CancellationToken 与 TaskTracker：
//! - 每个 AgentRun 拿到子 token，关闭时在下一个挂起点转为 Aborted
//! - 编排循环与触发器监听同一个 token 退出
//! - drain 在限定时间内等待仍在进行的运行结束；路由与通道由网关在 drain 之后另行关闭

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 用户发起的退出（Ctrl+C 或控制台输入结束）
    UserInitiated,
    /// SIGTERM 信号
    Signal,
}

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            shutdown_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// 根 token（用于取消正在进行的任务）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 运行任务的追踪器
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// 触发关闭
    pub fn shutdown(&self, reason: ShutdownReason) {
        if !self.shutdown_token.is_cancelled() {
            tracing::info!(reason = ?reason, "shutdown requested");
        }
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 等待追踪的任务结束，超过 grace 返回 false
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "waiting for in-flight runs");
        }
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(remaining = self.tracker.len(), "grace period elapsed with runs still active");
                false
            }
        }
    }

    /// 监听 Ctrl+C 与 SIGTERM，收到任一信号即触发关闭；关闭已由别处触发时任务退出
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let token = manager.token();
            let reason = tokio::select! {
                _ = token.cancelled() => return,
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => ShutdownReason::UserInitiated,
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot listen for Ctrl+C");
                        return;
                    }
                },
                _ = terminate() => ShutdownReason::Signal,
            };
            manager.shutdown(reason);
        });
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
