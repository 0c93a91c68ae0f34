use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_core::future::BoxFuture;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};
use tokio::task::JoinHandle;

use crate::messages;
use crate::registry::{CategoryKey, Registry};
use crate::Bot;

/// Delivers a finished announcement to a chat.
pub trait Announcer: Send + Sync + 'static {
    fn announce(&self, chat_id: ChatId, text: String) -> BoxFuture<'static, ()>;
}

impl Announcer for Bot {
    fn announce(&self, chat_id: ChatId, text: String) -> BoxFuture<'static, ()> {
        let bot = self.clone();
        Box::pin(async move {
            let sent = bot
                .send_message(chat_id, text)
                .parse_mode(ParseMode::Html)
                .await;

            let msg = match sent {
                Ok(msg) => msg,
                Err(e) => {
                    log::warn!("Couldn't send announcement to {chat_id}: {e}");
                    return;
                }
            };

            // not every chat lets us pin
            if let Err(e) = bot.pin_chat_message(chat_id, msg.id).await {
                log::debug!("Couldn't pin announcement in {chat_id}: {e}");
            }
        })
    }
}

/// An armed delayed dispatch.
pub struct ScheduledDispatch {
    handle: JoinHandle<()>,
    fires_at: DateTime<Utc>,
}

impl ScheduledDispatch {
    pub fn fires_at(&self) -> DateTime<Utc> {
        self.fires_at
    }

    #[cfg(test)]
    pub fn cancel(self) {
        self.handle.abort();
    }
}

pub enum Dispatch {
    Sent,
    Scheduled(ScheduledDispatch),
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
    announcer: Arc<dyn Announcer>,
}

impl Dispatcher {
    pub fn new(registry: Registry, announcer: Arc<dyn Announcer>) -> Self {
        Self {
            registry,
            announcer,
        }
    }

    /// Banned users are tagged like everyone else; only /list stays silent.
    pub async fn build_announcement(
        &self,
        key: &CategoryKey,
        message: &str,
        invited_by: &str,
    ) -> String {
        let subscribers = self.registry.members(key).await;
        messages::announcement(key.category(), message, invited_by, &subscribers)
    }

    pub async fn dispatch_now(&self, key: &CategoryKey, message: &str, invited_by: &str) {
        let text = self.build_announcement(key, message, invited_by).await;
        log::info!("{key}: dispatching gathering by {invited_by}");
        self.announcer.announce(key.chat_id(), text).await;
    }

    /// Dispatches right away if `delay_minutes` is not positive. `invited_by` is
    /// only credited then; a fired timer announces as [`messages::SCHEDULED_INVITER`].
    pub async fn dispatch_delayed(
        &self,
        key: &CategoryKey,
        message: &str,
        invited_by: &str,
        delay_minutes: i64,
    ) -> Dispatch {
        let Ok(minutes @ 1..) = u64::try_from(delay_minutes) else {
            self.dispatch_now(key, message, invited_by).await;
            return Dispatch::Sent;
        };

        let delay = Duration::from_secs(minutes.saturating_mul(60));
        let fires_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let this = self.clone();
        let key = key.clone();
        let message = message.to_string();
        log::debug!("{key}: {invited_by} armed a gathering");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            log::debug!("{key}: timer fired");
            this.dispatch_now(&key, &message, messages::SCHEDULED_INVITER)
                .await;
        });

        Dispatch::Scheduled(ScheduledDispatch { handle, fires_at })
    }
}

#[cfg(test)]
pub mod tests {
    use std::sync::Mutex;

    use teloxide::types::UserId;

    use super::*;
    use crate::registry::Subscriber;

    /// Records announcements instead of sending them.
    #[derive(Clone, Default)]
    pub struct RecordingAnnouncer {
        sent: Arc<Mutex<Vec<(ChatId, String)>>>,
    }

    impl RecordingAnnouncer {
        pub fn sent(&self) -> Vec<(ChatId, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Announcer for RecordingAnnouncer {
        fn announce(&self, chat_id: ChatId, text: String) -> BoxFuture<'static, ()> {
            self.sent.lock().unwrap().push((chat_id, text));
            Box::pin(async {})
        }
    }

    async fn setup(n: u64) -> (Dispatcher, RecordingAnnouncer, CategoryKey) {
        let registry = Registry::new();
        let key = CategoryKey::new(ChatId(-10), "pubg");
        for id in 1..=n {
            registry
                .join(&key, Subscriber::new(UserId(id), &format!("p{id}")))
                .await;
        }
        let announcer = RecordingAnnouncer::default();
        let dispatcher = Dispatcher::new(registry, Arc::new(announcer.clone()));
        (dispatcher, announcer, key)
    }

    #[tokio::test]
    async fn unknown_category_announces_without_mentions() {
        let (dispatcher, announcer, _) = setup(0).await;
        let key = CategoryKey::new(ChatId(-10), "chess");

        dispatcher.dispatch_now(&key, "Game on!", "ann").await;

        let sent = announcer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChatId(-10));
        assert!(sent[0].1.starts_with("🎮 <b>CHESS</b>"));
        assert!(!sent[0].1.contains("tg://"));
    }

    #[tokio::test]
    async fn seventy_five_subscribers_get_fifty_mentions() {
        let (dispatcher, _, key) = setup(75).await;

        let text = dispatcher.build_announcement(&key, "go", "ann").await;
        assert_eq!(text.matches("tg://user?id=").count(), 50);
        assert!(!text.contains(">p51<"));
    }

    #[tokio::test(start_paused = true)]
    async fn non_positive_delay_sends_immediately() {
        let (dispatcher, announcer, key) = setup(1).await;

        for delay in [0, -3] {
            let dispatch = dispatcher.dispatch_delayed(&key, "go", "ann", delay).await;
            assert!(matches!(dispatch, Dispatch::Sent));
        }
        let sent = announcer.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].1.contains("Invited by: ann"));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_dispatch_fires_once_after_delay() {
        let (dispatcher, announcer, key) = setup(2).await;

        let dispatch = dispatcher.dispatch_delayed(&key, "go", "ann", 5).await;
        let Dispatch::Scheduled(scheduled) = dispatch else {
            panic!("expected a scheduled dispatch");
        };
        assert!(scheduled.fires_at() > Utc::now());

        tokio::time::sleep(Duration::from_secs(5 * 60 - 1)).await;
        assert!(announcer.sent().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let sent = announcer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Invited by: Scheduled System"));
        assert!(!sent[0].1.contains("ann"));

        tokio::time::sleep(Duration::from_secs(60 * 60)).await;
        assert_eq!(announcer.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_dispatch_sees_later_joins() {
        let (dispatcher, announcer, key) = setup(1).await;

        dispatcher.dispatch_delayed(&key, "go", "ann", 1).await;
        dispatcher
            .registry
            .join(&key, Subscriber::new(UserId(99), "late"))
            .await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        let sent = announcer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("tg://user?id=99\""));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_dispatch_never_fires() {
        let (dispatcher, announcer, key) = setup(1).await;

        let Dispatch::Scheduled(scheduled) =
            dispatcher.dispatch_delayed(&key, "go", "ann", 1).await
        else {
            panic!("expected a scheduled dispatch");
        };
        scheduled.cancel();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(announcer.sent().is_empty());
    }
}
