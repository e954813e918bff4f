//! AgentLoop：消费入站消息，按会话串行驱动 AgentRun，把结果送回出站
//!
//! 准入策略是先排队再拒绝：会话空闲则立即运行；运行中则进有界队列并（可选）回一条排队提示；
//! 队列满则回 busy 提示。运行结束时排队消息在同一把锁下接着处理，因此历史顺序与到达顺序一致。
//! 每次运行恰好产生一条出站消息：回复、失败提示，或关闭时尽力发出的取消提示。

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::run::{AgentRunner, RunOutcome};
use crate::bus::{HubError, InboundMessage, MessageHub, OutboundMessage};
use crate::core::AgentError;
use crate::session::{Admission, RunGuard, SessionRegistry};

/// 消息排队时的提示
pub const QUEUED_NOTICE: &str = "I'm still working on your previous message. This one is queued and I'll get to it next.";
/// 队列已满时的提示
pub const BUSY_NOTICE: &str = "I'm still processing your previous requests. Please wait a moment and try again.";

pub struct AgentLoop {
    hub: Arc<MessageHub>,
    sessions: Arc<SessionRegistry>,
    runner: Arc<AgentRunner>,
    queue_notice: bool,
    tracker: TaskTracker,
}

impl AgentLoop {
    pub fn new(hub: Arc<MessageHub>, sessions: Arc<SessionRegistry>, runner: Arc<AgentRunner>) -> Self {
        Self {
            hub,
            sessions,
            runner,
            queue_notice: true,
            tracker: TaskTracker::new(),
        }
    }

    pub fn with_queue_notice(mut self, enabled: bool) -> Self {
        self.queue_notice = enabled;
        self
    }

    /// 与 ShutdownManager 共用追踪器，关闭时可等待运行结束
    pub fn with_tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// 在后台运行消费循环
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<Result<(), HubError>> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// 消费入站队列直到取消或所有生产者关闭
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), HubError> {
        let mut inbound = self.hub.take_inbound().ok_or_else(|| {
            tracing::error!("inbound stream already taken by another consumer");
            HubError::Closed
        })?;
        tracing::info!("agent loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = inbound.recv() => match next {
                    Some(msg) => self.handle(msg, &cancel).await,
                    None => break,
                },
            }
        }
        tracing::info!("agent loop stopped");
        Ok(())
    }

    /// 处理一条入站消息：准入后要么启动运行，要么回排队/busy 提示
    pub async fn handle(self: &Arc<Self>, msg: InboundMessage, cancel: &CancellationToken) {
        tracing::debug!(channel = %msg.channel, conversation = %msg.conversation_id, "inbound message");
        let queued_notice = OutboundMessage::reply_to(&msg, QUEUED_NOTICE);
        match self.sessions.admit(msg) {
            Admission::Run(guard, msg) => {
                let this = Arc::clone(self);
                let cancel = cancel.clone();
                self.tracker.spawn(async move { this.drive(guard, msg, cancel).await });
            }
            Admission::Queued { position } => {
                tracing::info!(
                    channel = %queued_notice.channel,
                    conversation = %queued_notice.conversation_id,
                    position,
                    "session busy, message queued"
                );
                if self.queue_notice {
                    self.deliver(queued_notice, cancel).await;
                }
            }
            Admission::Busy(msg) => {
                tracing::warn!(channel = %msg.channel, conversation = %msg.conversation_id, "session busy and queue full, rejecting");
                self.deliver(OutboundMessage::reply_to(&msg, BUSY_NOTICE), cancel).await;
                msg.complete_ack();
            }
        }
    }

    /// 依次处理本会话的消息，直到队列为空
    async fn drive(self: Arc<Self>, guard: RunGuard, msg: InboundMessage, cancel: CancellationToken) {
        let mut current = Some((guard, msg));
        while let Some((mut guard, msg)) = current.take() {
            let run_cancel = cancel.child_token();
            let outcome = self.runner.run(&mut guard, &msg, &run_cancel).await;
            self.report(&msg, outcome, &cancel).await;
            msg.complete_ack();
            current = self.sessions.release(guard);
        }
    }

    async fn report(&self, msg: &InboundMessage, outcome: RunOutcome, cancel: &CancellationToken) {
        match outcome {
            RunOutcome::Completed { reply, .. } => {
                self.deliver(OutboundMessage::reply_to(msg, reply), cancel).await;
            }
            RunOutcome::Failed { error, iterations } => {
                tracing::warn!(
                    channel = %msg.channel,
                    conversation = %msg.conversation_id,
                    iterations,
                    error = %error,
                    "run failed"
                );
                self.deliver(OutboundMessage::reply_to(msg, error.user_notice()), cancel).await;
            }
            RunOutcome::Aborted { iterations } => {
                tracing::info!(channel = %msg.channel, conversation = %msg.conversation_id, iterations, "run aborted");
                let notice = OutboundMessage::reply_to(msg, AgentError::Cancelled.user_notice());
                if !self.hub.try_send_outbound(notice) {
                    tracing::debug!("outbound full during shutdown, cancellation notice dropped");
                }
            }
        }
    }

    /// 出站投递：正常情况下等待队列空位；关闭后不再等待
    async fn deliver(&self, out: OutboundMessage, cancel: &CancellationToken) {
        tokio::select! {
            biased;
            res = self.hub.send_outbound(out.clone()) => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, channel = %out.channel, "failed to deliver outbound message");
                }
            }
            _ = cancel.cancelled() => {
                if !self.hub.try_send_outbound(out) {
                    tracing::debug!("outbound full during shutdown, message dropped");
                }
            }
        }
    }
}
