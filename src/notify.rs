//! Local notification dispatch. Reminders are pushed to the user's connected
//! clients over the WebSocket broadcast channel; delivery is best effort.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::mood_entry::MoodEntry;
use crate::schedule::DueSlots;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub data: Value,
}

impl Notification {
    /// Reminder for the earliest due slot, with the pending queue size.
    pub fn mood_reminder(user_id: Uuid, due: &DueSlots) -> Self {
        Self {
            user_id,
            title: "😊 Time for Mood Check-in".into(),
            body: format!("{} - How are you feeling right now?", due.slot.label),
            data: serde_json::json!({
                "type": "mood_reminder",
                "label": due.slot.label,
                "schedule_key": due.slot.slot_key,
                "interval_number": due.slot.slot_key.ordinal(),
                "pending": due.pending.len(),
            }),
        }
    }

    pub fn mood_logged(entry: &MoodEntry) -> Self {
        Self {
            user_id: entry.user_id,
            title: "🎯 Mood Logged!".into(),
            body: format!(
                "You're feeling {} today. Keep tracking your emotional journey!",
                entry.mood_label
            ),
            data: serde_json::json!({
                "type": "mood_entry",
                "mood": entry.mood_emoji,
                "label": entry.mood_label,
                "time": entry.entry_time.format("%H:%M:%S").to_string(),
            }),
        }
    }

    pub fn all_check_ins_done(user_id: Uuid, total: usize) -> Self {
        Self {
            user_id,
            title: "🎉 Amazing!".into(),
            body: format!(
                "You've completed all {total} mood check-ins for today! Great job tracking your emotional wellness."
            ),
            data: serde_json::json!({ "type": "mood_all_done" }),
        }
    }
}

/// Fire-and-forget. Implementations must not block or fail the caller.
pub trait NotificationDispatcher: Send + Sync {
    fn notify(&self, notification: Notification);
}

pub struct BroadcastDispatcher {
    ws_tx: Option<broadcast::Sender<String>>,
}

impl BroadcastDispatcher {
    pub fn new(ws_tx: Option<broadcast::Sender<String>>) -> Self {
        Self { ws_tx }
    }
}

impl NotificationDispatcher for BroadcastDispatcher {
    fn notify(&self, notification: Notification) {
        tracing::debug!(
            user_id = %notification.user_id,
            title = %notification.title,
            "Dispatching notification"
        );

        if let Some(tx) = self.ws_tx.as_ref() {
            let msg = serde_json::json!({
                "type": "notification",
                "user_id": notification.user_id,
                "title": notification.title,
                "body": notification.body,
                "data": notification.data,
            });
            // No receivers just means nobody is connected right now.
            let _ = tx.send(msg.to_string());
        }
    }
}

/// Keeps every dispatched notification for assertions.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: std::sync::Mutex<Vec<Notification>>,
}

#[cfg(test)]
impl RecordingDispatcher {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.sent()
            .iter()
            .filter(|n| n.data.get("type").and_then(Value::as_str) == Some(kind))
            .count()
    }
}

#[cfg(test)]
impl NotificationDispatcher for RecordingDispatcher {
    fn notify(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_dispatcher_tags_user() {
        let (tx, mut rx) = broadcast::channel(4);
        let dispatcher = BroadcastDispatcher::new(Some(tx));
        let user_id = Uuid::new_v4();

        dispatcher.notify(Notification {
            user_id,
            title: "hello".into(),
            body: "world".into(),
            data: serde_json::json!({ "type": "mood_reminder" }),
        });

        let msg: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "notification");
        assert_eq!(msg["user_id"], user_id.to_string());
        assert_eq!(msg["data"]["type"], "mood_reminder");
    }

    #[test]
    fn test_broadcast_dispatcher_without_listeners_is_silent() {
        let (tx, rx) = broadcast::channel::<String>(4);
        drop(rx);
        BroadcastDispatcher::new(Some(tx)).notify(Notification {
            user_id: Uuid::nil(),
            title: String::new(),
            body: String::new(),
            data: Value::Null,
        });
        BroadcastDispatcher::new(None).notify(Notification {
            user_id: Uuid::nil(),
            title: String::new(),
            body: String::new(),
            data: Value::Null,
        });
    }
}
