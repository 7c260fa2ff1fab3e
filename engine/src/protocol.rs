//! Wire protocol shared by the server and clients.
//!
//! HTTP bodies use camelCase. Change-stream frames are JSON text messages
//! tagged by an `event` field, e.g.
//! `{"event":"change","keys":["theme"],"source":"4f1c..."}`.

use crate::{ChangeEvent, InstanceId, Key, Snapshot, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Header carrying the writer's [`InstanceId`] on every write request.
pub const INSTANCE_HEADER: &str = "x-instance-id";

/// Body of a point write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetRequest {
    pub key: Key,
    pub value: Value,
}

/// Body of a bulk write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkSetRequest {
    pub data: Snapshot,
}

/// Acknowledgement of a point write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetResponse {
    pub ok: bool,
    pub key: Key,
}

/// Acknowledgement of a write that touches a number of keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub ok: bool,
    pub count: usize,
}

/// Acknowledgement of a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub ok: bool,
    pub removed: bool,
}

/// A write as a client queues it for the server.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set { key: Key, value: Value },
    BulkSet { data: Snapshot },
    Remove { key: Key },
    Clear,
}

impl WriteOp {
    /// Keys this write touches. `Clear` touches an unknown set and returns
    /// an empty one.
    pub fn keys(&self) -> BTreeSet<Key> {
        match self {
            WriteOp::Set { key, .. } | WriteOp::Remove { key } => {
                std::iter::once(key.clone()).collect()
            }
            WriteOp::BulkSet { data } => data.keys().cloned().collect(),
            WriteOp::Clear => BTreeSet::new(),
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteOp::Set { .. } => "set",
            WriteOp::BulkSet { .. } => "bulk_set",
            WriteOp::Remove { .. } => "remove",
            WriteOp::Clear => "clear",
        }
    }
}

/// Messages pushed from server to client over the change stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Sent once when the stream is established.
    Hello {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instance: Option<InstanceId>,
    },

    /// One mutation committed on the server.
    Change {
        keys: Vec<Key>,
        /// Instance that caused the change, null when unknown
        source: Option<InstanceId>,
    },

    /// Keep-alive sent on a fixed interval.
    Heartbeat,

    /// Response to a client ping.
    Pong,
}

impl StreamMessage {
    pub fn change(event: &ChangeEvent) -> Self {
        StreamMessage::Change {
            keys: event.keys.iter().cloned().collect(),
            source: event.origin.clone(),
        }
    }

    /// The change event carried by this message, if any.
    pub fn into_event(self) -> Option<ChangeEvent> {
        match self {
            StreamMessage::Change { keys, source } => Some(ChangeEvent::new(source, keys)),
            _ => None,
        }
    }
}

/// Messages sent from client to server over the change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRequest {
    /// Keep-alive ping.
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_message_wire_format() {
        let origin = InstanceId::parse("tab-a").unwrap();
        let event = ChangeEvent::new(Some(origin), ["theme".to_string()]);

        let json = serde_json::to_value(StreamMessage::change(&event)).unwrap();
        assert_eq!(
            json,
            json!({"event": "change", "keys": ["theme"], "source": "tab-a"})
        );
    }

    #[test]
    fn change_message_with_unknown_source() {
        let msg: StreamMessage =
            serde_json::from_str(r#"{"event":"change","keys":["a","b"],"source":null}"#).unwrap();
        let event = msg.into_event().unwrap();
        assert!(event.origin.is_none());
        assert_eq!(event.keys.len(), 2);
    }

    #[test]
    fn heartbeat_and_hello() {
        assert_eq!(
            serde_json::to_string(&StreamMessage::Heartbeat).unwrap(),
            r#"{"event":"heartbeat"}"#
        );
        assert_eq!(
            serde_json::to_string(&StreamMessage::Hello { instance: None }).unwrap(),
            r#"{"event":"hello"}"#
        );
        assert!(StreamMessage::Heartbeat.into_event().is_none());
    }

    #[test]
    fn client_ping_deserialization() {
        let msg: StreamRequest = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(msg, StreamRequest::Ping);
    }

    #[test]
    fn bulk_request_shape() {
        let req: BulkSetRequest =
            serde_json::from_str(r#"{"data": {"a": 1, "b": {"nested": true}}}"#).unwrap();
        assert_eq!(req.data.len(), 2);
        assert_eq!(req.data.get("b"), Some(&json!({"nested": true})));
    }

    #[test]
    fn write_op_keys() {
        let data: Snapshot = [("x".to_string(), json!(1)), ("y".to_string(), json!(2))]
            .into_iter()
            .collect();
        assert_eq!(WriteOp::BulkSet { data }.keys().len(), 2);
        assert_eq!(WriteOp::Remove { key: "k".into() }.keys().len(), 1);
        assert!(WriteOp::Clear.keys().is_empty());
    }
}
