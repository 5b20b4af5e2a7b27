//! Notification data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicI64, Ordering};

/// Urgency hint carried by a notification payload.
///
/// The backend sends a free-form string; anything unrecognized is treated
/// as `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            "urgent" | "critical" => Priority::Urgent,
            _ => Priority::Normal,
        }
    }
}

/// Opaque cargo of a notification.
///
/// Only the fields the delivery pipeline looks at are named; everything
/// else the backend sends is kept verbatim in `extra`. Named fields accept
/// any JSON type, non-strings are kept as their JSON text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(default, deserialize_with = "deserialize_text", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "deserialize_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text", skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(
        alias = "url",
        default,
        deserialize_with = "deserialize_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub action_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NotificationPayload {
    pub fn priority(&self) -> Priority {
        self.priority
            .as_deref()
            .map(Priority::parse)
            .unwrap_or(Priority::Normal)
    }

    /// Build a payload from an arbitrary JSON value without ever failing.
    fn from_value_lossy(value: Value) -> Self {
        match value {
            Value::Object(map) => serde_json::from_value(Value::Object(map.clone()))
                .unwrap_or_else(|_| NotificationPayload {
                    extra: map,
                    ..Default::default()
                }),
            Value::String(message) => NotificationPayload {
                message: Some(message),
                ..Default::default()
            },
            Value::Null => NotificationPayload::default(),
            other => {
                let mut extra = Map::new();
                extra.insert("value".to_string(), other);
                NotificationPayload {
                    extra,
                    ..Default::default()
                }
            }
        }
    }
}

/// A single notification held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "data", default, deserialize_with = "deserialize_payload")]
    pub payload: NotificationPayload,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }

    /// Build a record from an event delivered over the push channel.
    ///
    /// The event is either the payload itself with an optional `id` next to
    /// it, or an envelope `{ "id": .., "data": { .. } }`. Records without a
    /// server id get a client-side timestamp id. `created_at` is always the
    /// client clock.
    pub fn from_realtime(event: Value, now: DateTime<Utc>) -> Self {
        let (id, payload) = match event {
            Value::Object(mut map) => {
                let id = map.remove("id").and_then(id_from_value);
                let payload = match map.remove("data") {
                    Some(data @ Value::Object(_))
                        if !map.contains_key("title") && !map.contains_key("message") =>
                    {
                        NotificationPayload::from_value_lossy(data)
                    }
                    Some(data) => {
                        map.insert("data".to_string(), data);
                        NotificationPayload::from_value_lossy(Value::Object(map))
                    }
                    None => NotificationPayload::from_value_lossy(Value::Object(map)),
                };
                (id, payload)
            }
            other => (None, NotificationPayload::from_value_lossy(other)),
        };

        NotificationRecord {
            id: id.unwrap_or_else(|| local_id(now)),
            payload,
            read_at: None,
            created_at: now,
        }
    }
}

static LAST_LOCAL_ID: AtomicI64 = AtomicI64::new(0);

/// Client-assigned id: the timestamp in milliseconds, bumped so that ids
/// handed out by this process are strictly increasing.
pub fn local_id(now: DateTime<Utc>) -> String {
    let millis = now.timestamp_millis();
    let previous = LAST_LOCAL_ID
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(millis.max(last + 1))
        })
        .unwrap_or(millis);
    millis.max(previous + 1).to_string()
}

fn id_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_payload<'de, D>(deserializer: D) -> Result<NotificationPayload, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(NotificationPayload::from_value_lossy)
}

fn deserialize_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    id_from_value(value)
        .ok_or_else(|| serde::de::Error::custom("notification id must be a string or number"))
}
