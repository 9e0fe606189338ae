//! 订阅分发总线
//!
//! 每个订阅者一条有界队列，慢订阅者永远拖不住生产者：队列满了就把
//! 最旧的一条挤出去给新事件腾位，丢弃计数累加。单个订阅者看到的
//! 事件保持发布顺序（只会从头部丢，不会乱序）。不同订阅者互不影响。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mirror::events::ServerEvent;

/// 单个订阅者的队列容量
pub const QUEUE_CAPACITY: usize = 10;

struct QueueState {
    items: VecDeque<ServerEvent>,
    closed: bool,
}

struct EventQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    dropped: AtomicU64,
}

fn lock_state(queue: &EventQueue) -> MutexGuard<'_, QueueState> {
    queue.state.lock().unwrap_or_else(|e| e.into_inner())
}

impl EventQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(QUEUE_CAPACITY),
                closed: false,
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        })
    }

    /// 入队；满了挤掉最旧的一条。永不阻塞调用方。
    fn push(&self, event: ServerEvent) -> bool {
        let mut state = lock_state(self);
        if state.closed {
            return false;
        }
        if state.items.len() == QUEUE_CAPACITY {
            state.items.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("[EventBus] ⚠️ 订阅队列已满，挤掉最旧事件 (累计丢弃 {})", total);
        }
        state.items.push_back(event);
        drop(state);
        self.notify.notify_one();
        true
    }

    fn close(&self) {
        let mut state = lock_state(self);
        state.closed = true;
        drop(state);
        // 唤醒已挂起的消费者，再留一个许可给正要挂起的
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

/// 订阅句柄：逐条消费属于自己的事件流
pub struct Subscription {
    pub id: Uuid,
    session: String,
    queue: Arc<EventQueue>,
}

impl Subscription {
    pub fn session(&self) -> &str {
        &self.session
    }

    /// 取下一条事件；队列关闭且余量耗尽后返回 None
    pub async fn recv(&self) -> Option<ServerEvent> {
        loop {
            {
                let mut state = lock_state(&self.queue);
                if let Some(event) = state.items.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            self.queue.notify.notified().await;
        }
    }

    /// 该订阅因队列满被丢弃的事件总数
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

/// 会话级事件总线
pub struct EventBus {
    sessions: Mutex<HashMap<String, HashMap<Uuid, Arc<EventQueue>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, HashMap<Uuid, Arc<EventQueue>>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self, session: &str) -> Subscription {
        let id = Uuid::new_v4();
        let queue = EventQueue::new();
        self.lock_sessions()
            .entry(session.to_string())
            .or_default()
            .insert(id, queue.clone());
        info!("[EventBus] 📡 会话 {} 新增订阅者 {}", session, id);
        Subscription {
            id,
            session: session.to_string(),
            queue,
        }
    }

    /// 摘除订阅者并关闭其队列；会话最后一个订阅者走了就移除会话条目
    pub fn unsubscribe(&self, session: &str, id: Uuid) {
        let mut sessions = self.lock_sessions();
        let Some(listeners) = sessions.get_mut(session) else {
            return;
        };
        if let Some(queue) = listeners.remove(&id) {
            queue.close();
            info!("[EventBus] 🗑️ 会话 {} 移除订阅者 {}", session, id);
        }
        if listeners.is_empty() {
            sessions.remove(session);
        }
    }

    /// 发布给会话的全体订阅者；同步完成，不等任何消费者
    pub fn publish(&self, session: &str, event: &ServerEvent) {
        let queues: Vec<Arc<EventQueue>> = {
            let sessions = self.lock_sessions();
            match sessions.get(session) {
                Some(listeners) => listeners.values().cloned().collect(),
                None => return,
            }
        };
        let mut delivered = 0;
        for queue in &queues {
            if queue.push(event.clone()) {
                delivered += 1;
            }
        }
        debug!(
            "[EventBus] 📬 事件 {} 分发给会话 {} 的 {} 个订阅者",
            event.tag, session, delivered
        );
    }

    /// 关停整个会话：关闭全部队列，订阅者把余量读完即收尾
    pub fn close_session(&self, session: &str) {
        let Some(listeners) = self.lock_sessions().remove(session) else {
            return;
        };
        for queue in listeners.values() {
            queue.close();
        }
        info!(
            "[EventBus] 会话 {} 关停，{} 个订阅者收到结束信号",
            session,
            listeners.len()
        );
    }

    pub fn subscriber_count(&self, session: &str) -> usize {
        self.lock_sessions().get(session).map_or(0, |l| l.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: i64) -> ServerEvent {
        ServerEvent {
            tag: "Message".to_string(),
            payload: serde_json::json!({ "seq": n }),
        }
    }

    fn seq(event: &ServerEvent) -> i64 {
        event.payload["seq"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_fifo_delivery() {
        let bus = EventBus::new();
        let sub = bus.subscribe("s1");
        for n in 0..3 {
            bus.publish("s1", &event(n));
        }
        for n in 0..3 {
            assert_eq!(seq(&sub.recv().await.unwrap()), n);
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_keeps_recent() {
        let bus = EventBus::new();
        let sub = bus.subscribe("s1");
        // 无人消费时连发 15 条：只留最近 10 条，前 5 条被挤掉
        for n in 0..15 {
            bus.publish("s1", &event(n));
        }
        bus.close_session("s1");

        let mut got = Vec::new();
        while let Some(e) = sub.recv().await {
            got.push(seq(&e));
        }
        assert_eq!(got, (5..15).collect::<Vec<_>>());
        assert_eq!(sub.dropped(), 5);
    }

    #[tokio::test]
    async fn test_each_subscriber_gets_own_copy() {
        let bus = EventBus::new();
        let sub1 = bus.subscribe("s1");
        let sub2 = bus.subscribe("s1");
        bus.publish("s1", &event(7));
        assert_eq!(seq(&sub1.recv().await.unwrap()), 7);
        assert_eq!(seq(&sub2.recv().await.unwrap()), 7);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let bus = EventBus::new();
        let sub_other = bus.subscribe("s2");
        bus.publish("s1", &event(1));
        bus.publish("s2", &event(2));
        assert_eq!(seq(&sub_other.recv().await.unwrap()), 2);
    }

    #[tokio::test]
    async fn test_slow_consumer_never_blocks_publisher() {
        let bus = EventBus::new();
        let sub = bus.subscribe("s1");
        // 发布是同步调用，100 条全部立即返回
        for n in 0..100 {
            bus.publish("s1", &event(n));
        }
        assert_eq!(sub.dropped(), 90);
        assert_eq!(seq(&sub.recv().await.unwrap()), 90);
    }

    #[tokio::test]
    async fn test_close_session_drains_then_ends() {
        let bus = EventBus::new();
        let sub = bus.subscribe("s1");
        bus.publish("s1", &event(1));
        bus.publish("s1", &event(2));
        bus.close_session("s1");

        assert_eq!(seq(&sub.recv().await.unwrap()), 1);
        assert_eq!(seq(&sub.recv().await.unwrap()), 2);
        assert!(sub.recv().await.is_none());
        assert_eq!(bus.subscriber_count("s1"), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_session_entry_when_last() {
        let bus = EventBus::new();
        let sub1 = bus.subscribe("s1");
        let sub2 = bus.subscribe("s1");
        assert_eq!(bus.subscriber_count("s1"), 2);

        bus.unsubscribe("s1", sub1.id);
        assert_eq!(bus.subscriber_count("s1"), 1);
        assert!(sub1.recv().await.is_none());

        bus.unsubscribe("s1", sub2.id);
        assert_eq!(bus.subscriber_count("s1"), 0);
        // 之后发布没有接收方，也不报错
        bus.publish("s1", &event(9));
    }

    #[tokio::test]
    async fn test_recv_wakes_on_later_publish() {
        let bus = EventBus::new();
        let sub = bus.subscribe("s1");
        let handle = tokio::spawn(async move { sub.recv().await.map(|e| seq(&e)) });
        // 等消费者挂起后再发布
        tokio::task::yield_now().await;
        bus.publish("s1", &event(42));
        assert_eq!(handle.await.unwrap(), Some(42));
    }
}
