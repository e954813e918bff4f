//! 会话注册表
//!
//! 以 (channel, conversation_id) 为键保存会话。运行锁的持有者把 Session 整体取走放进 RunGuard，
//! 结束时再放回，因此不持有 guard 就无法触碰历史。运行中到达的同键消息先进有界队列，满了才回 busy。

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::history::History;
use crate::bus::InboundMessage;
use crate::llm::Turn;

/// 会话键：通道标签 + 会话 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub channel: String,
    pub conversation_id: String,
}

impl SessionKey {
    pub fn new(channel: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            conversation_id: conversation_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.conversation_id)
    }
}

/// 单个会话
#[derive(Debug)]
pub struct Session {
    pub key: SessionKey,
    pub history: History,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    fn new(key: SessionKey, max_history_turns: usize) -> Self {
        let now = Utc::now();
        Self {
            key,
            history: History::new(max_history_turns),
            created_at: now,
            last_active: now,
        }
    }
}

/// 会话概况（不含历史）
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub key: SessionKey,
    pub created_at: DateTime<Utc>,
    pub runs: u64,
    pub running: bool,
    pub pending: usize,
}

struct Slot {
    /// 运行期间为 None（已移入 RunGuard）
    session: Option<Session>,
    created_at: DateTime<Utc>,
    running: bool,
    runs: u64,
    pending: VecDeque<InboundMessage>,
}

impl Slot {
    fn new(key: &SessionKey, max_history_turns: usize) -> Self {
        let session = Session::new(key.clone(), max_history_turns);
        Self {
            created_at: session.created_at,
            session: Some(session),
            running: false,
            runs: 0,
            pending: VecDeque::new(),
        }
    }

    fn info(&self, key: &SessionKey) -> SessionInfo {
        SessionInfo {
            key: key.clone(),
            created_at: self.created_at,
            runs: self.runs,
            running: self.running,
            pending: self.pending.len(),
        }
    }
}

/// 入站消息的准入结果
pub enum Admission {
    /// 拿到运行锁，立即处理该消息
    Run(RunGuard, InboundMessage),
    /// 已有运行，消息排在队列第 position 位（从 1 开始）
    Queued { position: usize },
    /// 已有运行且队列已满
    Busy(InboundMessage),
}

/// 会话注册表
pub struct SessionRegistry {
    slots: Mutex<HashMap<SessionKey, Slot>>,
    max_history_turns: usize,
    max_pending: usize,
}

impl SessionRegistry {
    pub fn new(max_history_turns: usize, max_pending: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_history_turns,
            max_pending,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 获取或创建会话，返回概况
    pub fn resolve(&self, key: &SessionKey) -> SessionInfo {
        let mut slots = self.lock();
        let max = self.max_history_turns;
        slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key, max))
            .info(key)
    }

    /// 尝试获取运行锁；已有运行时返回 None
    pub fn try_acquire_run(self: &Arc<Self>, key: &SessionKey) -> Option<RunGuard> {
        let mut slots = self.lock();
        let max = self.max_history_turns;
        let slot = slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key, max));
        if slot.running {
            return None;
        }
        Some(self.check_out(key, slot))
    }

    fn check_out(self: &Arc<Self>, key: &SessionKey, slot: &mut Slot) -> RunGuard {
        slot.running = true;
        slot.runs += 1;
        let mut session = slot
            .session
            .take()
            .unwrap_or_else(|| Session::new(key.clone(), self.max_history_turns));
        session.last_active = Utc::now();
        RunGuard {
            registry: Arc::clone(self),
            session: Some(session),
        }
    }

    /// 准入一条入站消息：空闲则开跑，运行中则排队，队列满则 busy
    pub fn admit(self: &Arc<Self>, msg: InboundMessage) -> Admission {
        let key = msg.session_key();
        let mut slots = self.lock();
        let max = self.max_history_turns;
        let slot = slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(&key, max));

        if slot.running {
            if slot.pending.len() < self.max_pending {
                slot.pending.push_back(msg);
                return Admission::Queued {
                    position: slot.pending.len(),
                };
            }
            return Admission::Busy(msg);
        }

        // 空闲但仍有排队消息时先处理队首，保持到达顺序
        let next = match slot.pending.pop_front() {
            Some(front) => {
                slot.pending.push_back(msg);
                front
            }
            None => msg,
        };
        let guard = self.check_out(&key, slot);
        Admission::Run(guard, next)
    }

    /// 运行结束：有排队消息则在不放锁的情况下交给下一次运行，否则归还会话并置为空闲
    pub fn release(&self, mut guard: RunGuard) -> Option<(RunGuard, InboundMessage)> {
        let restored = {
            let mut slots = self.lock();
            let key = guard.key().clone();
            match slots.get_mut(&key) {
                Some(slot) => match slot.pending.pop_front() {
                    Some(next) => {
                        slot.runs += 1;
                        if let Some(session) = guard.session.as_mut() {
                            session.last_active = Utc::now();
                        }
                        return Some((guard, next));
                    }
                    None => {
                        slot.session = guard.session.take();
                        slot.running = false;
                        true
                    }
                },
                None => false,
            }
        };
        if restored {
            tracing::debug!("session released");
        }
        // guard 此时不再持有会话，Drop 不会再碰注册表
        None
    }

    /// 会话历史快照；会话不存在或正在运行时返回 None
    pub fn history_snapshot(&self, key: &SessionKey) -> Option<Vec<Turn>> {
        self.lock()
            .get(key)
            .and_then(|slot| slot.session.as_ref())
            .map(|s| s.history.turns().to_vec())
    }

    pub fn is_running(&self, key: &SessionKey) -> bool {
        self.lock().get(key).map(|s| s.running).unwrap_or(false)
    }

    pub fn pending_len(&self, key: &SessionKey) -> usize {
        self.lock().get(key).map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop 路径：归还会话并置为空闲，排队消息留给下一次 admit
    fn restore(&self, session: Session) {
        let mut slots = self.lock();
        let key = session.key.clone();
        if let Some(slot) = slots.get_mut(&key) {
            slot.session = Some(session);
            slot.running = false;
        }
    }
}

/// 运行锁：持有期间独占会话；任何退出路径（包括 panic 与任务取消）都会在 Drop 时归还
pub struct RunGuard {
    registry: Arc<SessionRegistry>,
    session: Option<Session>,
}

impl RunGuard {
    fn session_ref(&self) -> &Session {
        // 只有 release 会取走会话，而 release 消耗 guard
        match &self.session {
            Some(s) => s,
            None => unreachable!("RunGuard used after release"),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.session_ref().key
    }

    pub fn session(&self) -> &Session {
        self.session_ref()
    }

    pub fn history(&self) -> &History {
        &self.session_ref().history
    }

    pub fn history_mut(&mut self) -> &mut History {
        match &mut self.session {
            Some(s) => &mut s.history,
            None => unreachable!("RunGuard used after release"),
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!(session = %session.key, "run guard dropped, restoring session");
            self.registry.restore(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> InboundMessage {
        InboundMessage::new("x", "u", "c1", text)
    }

    #[test]
    fn test_second_acquire_fails_while_running() {
        let reg = Arc::new(SessionRegistry::new(10, 4));
        let key = SessionKey::new("x", "c1");
        let guard = reg.try_acquire_run(&key).unwrap();
        assert!(reg.try_acquire_run(&key).is_none());
        assert!(reg.is_running(&key));
        drop(guard);
        assert!(!reg.is_running(&key));
        assert!(reg.try_acquire_run(&key).is_some());
    }

    #[test]
    fn test_history_survives_guard_round_trip() {
        let reg = Arc::new(SessionRegistry::new(10, 4));
        let key = SessionKey::new("x", "c1");
        let mut guard = reg.try_acquire_run(&key).unwrap();
        guard.history_mut().push(Turn::user("hello"));
        assert!(reg.history_snapshot(&key).is_none());
        assert!(reg.release(guard).is_none());
        assert_eq!(reg.history_snapshot(&key).unwrap().len(), 1);
        assert_eq!(reg.resolve(&key).runs, 1);
    }

    #[test]
    fn test_admit_queues_then_rejects() {
        let reg = Arc::new(SessionRegistry::new(10, 1));
        let Admission::Run(guard, first) = reg.admit(msg("a")) else {
            panic!("first message should run");
        };
        assert_eq!(first.text, "a");
        assert!(matches!(reg.admit(msg("b")), Admission::Queued { position: 1 }));
        match reg.admit(msg("c")) {
            Admission::Busy(m) => assert_eq!(m.text, "c"),
            _ => panic!("queue full should be busy"),
        }

        // 释放时直接交接给排队的 b，锁不空出
        let (guard, next) = reg.release(guard).unwrap();
        assert_eq!(next.text, "b");
        assert!(reg.is_running(&guard.key().clone()));
        assert!(reg.release(guard).is_none());
        assert!(!reg.is_running(&SessionKey::new("x", "c1")));
    }

    #[test]
    fn test_distinct_keys_run_independently() {
        let reg = Arc::new(SessionRegistry::new(10, 0));
        let a = reg.try_acquire_run(&SessionKey::new("x", "c1"));
        let b = reg.try_acquire_run(&SessionKey::new("x", "c2"));
        assert!(a.is_some() && b.is_some());
        assert_eq!(reg.len(), 2);
    }
}
