//! Plugin Events - 명시적 발행/구독
//!
//! 이벤트는 구독한 로드된 플러그인에게만 간다. main 플러그인은 `Plugin::on_event`로,
//! isolated 플러그인은 Host로 보내는 `event` 엔벨로프로 받는다.
//! 앱은 broadcast 채널로 모든 발행을 관찰할 수 있다.

use super::traits::Plugin;
use crate::ipc::{Envelope, HostLink, MessageType};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// 진단용 최근 이벤트 개수
const HISTORY_CAPACITY: usize = 100;

// ============================================================================
// PublishedEvent
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedEvent {
    pub name: String,
    pub payload: Value,

    /// 발행한 플러그인 (앱이 직접 발행하면 None)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
enum Target {
    Local(Arc<dyn Plugin>),
    Remote,
}

// ============================================================================
// EventHub
// ============================================================================

pub struct EventHub {
    /// 이벤트 이름 → (플러그인 ID → 전달 대상)
    subscriptions: RwLock<HashMap<String, BTreeMap<String, Target>>>,
    host: RwLock<Option<Arc<dyn HostLink>>>,
    history: Mutex<VecDeque<PublishedEvent>>,
    observers: broadcast::Sender<PublishedEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            host: RwLock::new(None),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            observers: broadcast::channel(HISTORY_CAPACITY).0,
        }
    }

    pub fn attach_host(&self, host: Arc<dyn HostLink>) {
        *self.host.write() = Some(host);
    }

    // ========================================================================
    // 구독
    // ========================================================================

    /// main 플러그인 구독
    pub fn subscribe_local(&self, plugin_id: &str, events: &[String], plugin: Arc<dyn Plugin>) {
        self.install(plugin_id, events, Target::Local(plugin));
    }

    /// isolated 플러그인 구독 (Host로 전달)
    pub fn subscribe_remote(&self, plugin_id: &str, events: &[String]) {
        self.install(plugin_id, events, Target::Remote);
    }

    fn install(&self, plugin_id: &str, events: &[String], target: Target) {
        let mut subscriptions = self.subscriptions.write();
        for event in events {
            subscriptions
                .entry(event.clone())
                .or_default()
                .insert(plugin_id.to_string(), target.clone());
        }
        if !events.is_empty() {
            debug!("{} subscribed to {:?}", plugin_id, events);
        }
    }

    /// 플러그인의 모든 구독 해제
    pub fn unsubscribe(&self, plugin_id: &str) {
        let mut subscriptions = self.subscriptions.write();
        for subscribers in subscriptions.values_mut() {
            subscribers.remove(plugin_id);
        }
        subscriptions.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// 이벤트 구독자 ID (정렬)
    pub fn subscribers(&self, event: &str) -> Vec<String> {
        self.subscriptions
            .read()
            .get(event)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// 모든 발행 관찰
    pub fn observe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.observers.subscribe()
    }

    pub fn history(&self) -> Vec<PublishedEvent> {
        self.history.lock().iter().cloned().collect()
    }

    // ========================================================================
    // 발행
    // ========================================================================

    /// 발행 후 전달한 구독자 수를 돌려준다
    pub async fn publish(&self, event: &str, payload: Value, source: Option<&str>) -> usize {
        let published = PublishedEvent {
            name: event.to_string(),
            payload: payload.clone(),
            source: source.map(str::to_string),
            timestamp: Utc::now(),
        };
        {
            let mut history = self.history.lock();
            if history.len() == HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(published.clone());
        }
        let _ = self.observers.send(published);

        let targets: Vec<(String, Target)> = self
            .subscriptions
            .read()
            .get(event)
            .map(|s| s.iter().map(|(id, t)| (id.clone(), t.clone())).collect())
            .unwrap_or_default();
        let host = self.host.read().clone();

        let mut delivered = 0;
        for (plugin_id, target) in targets {
            match target {
                Target::Local(plugin) => {
                    plugin.on_event(event, payload.clone()).await;
                    delivered += 1;
                }
                Target::Remote => {
                    let Some(host) = &host else {
                        warn!("No host to deliver {} to {}", event, plugin_id);
                        continue;
                    };
                    let mut message = Envelope::new(MessageType::Event)
                        .with_plugin(plugin_id.as_str())
                        .with("event", event)
                        .with("data", payload.clone());
                    if let Some(source) = source {
                        message = message.with("source", source);
                    }
                    match host.send(message).await {
                        Ok(()) => delivered += 1,
                        Err(e) => warn!("Failed to deliver {} to {}: {}", event, plugin_id, e),
                    }
                }
            }
        }

        debug!("Event {} delivered to {} subscribers", event, delivered);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginContext;
    use async_trait::async_trait;
    use eterm_foundation::Result;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        async fn activate(&self, _ctx: PluginContext) -> Result<()> {
            Ok(())
        }

        async fn on_event(&self, event: &str, payload: Value) {
            self.seen.lock().push((event.to_string(), payload));
        }
    }

    #[tokio::test]
    async fn test_only_subscribers_receive() {
        let hub = EventHub::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        hub.subscribe_local("a", &["focus".to_string()], a.clone());
        hub.subscribe_local("b", &["blur".to_string()], b.clone());

        let delivered = hub.publish("focus", serde_json::json!({"tab": 1}), None).await;

        assert_eq!(delivered, 1);
        assert_eq!(a.seen.lock().len(), 1);
        assert!(b.seen.lock().is_empty());
        assert_eq!(hub.history().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_observe() {
        let hub = EventHub::new();
        let a = Arc::new(Recorder::default());
        hub.subscribe_local("a", &["focus".to_string()], a.clone());
        hub.unsubscribe("a");
        assert!(hub.subscribers("focus").is_empty());

        let mut observer = hub.observe();
        assert_eq!(hub.publish("focus", Value::Null, Some("x")).await, 0);
        let seen = observer.recv().await.unwrap();
        assert_eq!(seen.name, "focus");
        assert_eq!(seen.source.as_deref(), Some("x"));
        assert!(a.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_remote_without_host_is_not_delivered() {
        let hub = EventHub::new();
        hub.subscribe_remote("iso", &["focus".to_string()]);
        assert_eq!(hub.subscribers("focus"), vec!["iso"]);
        assert_eq!(hub.publish("focus", Value::Null, None).await, 0);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let hub = EventHub::new();
        for i in 0..(HISTORY_CAPACITY + 5) {
            hub.publish("tick", serde_json::json!(i), None).await;
        }
        let history = hub.history();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].payload, serde_json::json!(5));
    }
}
