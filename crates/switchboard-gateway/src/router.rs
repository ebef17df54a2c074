//! Message dispatch keyed by message type.
//!
//! The router holds no state of its own. Each handler looks at one decoded
//! request plus the sender's session and returns an [`Action`]: an immediate
//! reply, a store call, an upstream call, or a topic operation. The
//! [`Gateway`](crate::gateway::Gateway) carries the action out.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use switchboard_outbound::{CallRequest, CallResponse};
use switchboard_protocol::CodecError;
use switchboard_store::{Operation, Reply};
use switchboard_types::{ConnectionId, Message, MessageType, Value, ValueError};

use crate::session::Session;

/// What the gateway should do for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Answer at once.
    Reply {
        /// Response type.
        kind: MessageType,
        /// Response payload.
        payload: Value,
    },
    /// Run a store operation and answer with its result.
    Store {
        /// Operation to run.
        op: Operation,
        /// Response type for a successful result.
        reply: MessageType,
    },
    /// Call the upstream origin and answer with its response.
    Fetch {
        /// Request to send.
        request: CallRequest,
    },
    /// Add the sender to a topic.
    Subscribe {
        /// Topic name.
        topic: String,
    },
    /// Remove the sender from a topic.
    Unsubscribe {
        /// Topic name.
        topic: String,
    },
    /// Send an `event` to every subscriber of a topic.
    Publish {
        /// Topic name.
        topic: String,
        /// Event data.
        data: Value,
    },
}

/// A request could not be routed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// Clients may not send this type on an open connection.
    #[error("`{0}` is not accepted here")]
    Unsupported(MessageType),

    /// The payload is unusable.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl RouteError {
    /// Reason string sent to the client.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Unsupported(_) => "unsupported",
            Self::Codec(e) => e.reason(),
        }
    }
}

impl From<ValueError> for RouteError {
    fn from(e: ValueError) -> Self {
        Self::Codec(CodecError::Payload(e))
    }
}

/// One inbound request with the sender's session.
pub struct Request<'a> {
    /// Sender.
    pub connection: ConnectionId,
    /// Decoded message.
    pub message: &'a Message,
    /// Sender's session.
    pub session: &'a mut Session,
}

type Handler = fn(Request<'_>) -> Result<Action, ValueError>;

/// Dispatch table from message type to handler.
#[derive(Debug)]
pub struct Router {
    handlers: HashMap<MessageType, Handler>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Router with every request type registered.
    pub fn new() -> Self {
        let mut handlers: HashMap<MessageType, Handler> = HashMap::new();
        handlers.insert(MessageType::Ping, ping);
        handlers.insert(MessageType::Get, get);
        handlers.insert(MessageType::Set, set);
        handlers.insert(MessageType::Delete, delete);
        handlers.insert(MessageType::Incr, incr);
        handlers.insert(MessageType::Hset, hset);
        handlers.insert(MessageType::Hgetall, hgetall);
        handlers.insert(MessageType::SessionGet, session_get);
        handlers.insert(MessageType::SessionSet, session_set);
        handlers.insert(MessageType::Subscribe, subscribe);
        handlers.insert(MessageType::Unsubscribe, unsubscribe);
        handlers.insert(MessageType::Publish, publish);
        handlers.insert(MessageType::Fetch, fetch);
        Self { handlers }
    }

    /// Route one request from an open connection.
    ///
    /// # Errors
    ///
    /// [`RouteError::Unsupported`] for `hello` and response types,
    /// [`RouteError::Codec`] when the payload lacks what the handler needs.
    pub fn route(&self, request: Request<'_>) -> Result<Action, RouteError> {
        let kind = request.message.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or(RouteError::Unsupported(kind))?;
        Ok(handler(request)?)
    }
}

/// Payload of a successful store reply.
pub fn store_payload(reply_kind: MessageType, reply: Reply) -> Value {
    let field = match reply_kind {
        MessageType::SetResult => "ok",
        MessageType::DeleteResult => "deleted",
        MessageType::HsetResult => "created",
        MessageType::HgetallResult => "fields",
        _ => "value",
    };
    Value::object([(field, reply.into_value())])
}

/// Payload of a `fetch_result`.
pub fn fetch_payload(response: &CallResponse) -> Value {
    let headers = response
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), Value::from(value.as_str())))
        .collect::<BTreeMap<_, _>>();
    Value::object([
        ("status", Value::from(response.status)),
        ("headers", Value::Object(headers)),
        ("body", Value::from(response.body_text().into_owned())),
    ])
}

fn key(payload: &Value) -> Result<String, ValueError> {
    let key = payload.require_str("key")?;
    if key.is_empty() {
        return Err(ValueError::invalid("key", "must not be empty"));
    }
    Ok(key.to_owned())
}

fn topic(payload: &Value) -> Result<String, ValueError> {
    let topic = payload.require_str("topic")?;
    if topic.is_empty() {
        return Err(ValueError::invalid("topic", "must not be empty"));
    }
    Ok(topic.to_owned())
}

fn positive_millis(payload: &Value, field: &str) -> Result<Option<Duration>, ValueError> {
    payload
        .optional_i64(field)?
        .map(|ms| {
            u64::try_from(ms)
                .ok()
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .ok_or_else(|| ValueError::invalid(field, "must be positive"))
        })
        .transpose()
}

fn ping(request: Request<'_>) -> Result<Action, ValueError> {
    Ok(Action::Reply {
        kind: MessageType::Pong,
        payload: request.message.payload().clone(),
    })
}

fn get(request: Request<'_>) -> Result<Action, ValueError> {
    Ok(Action::Store {
        op: Operation::Get {
            key: key(request.message.payload())?,
        },
        reply: MessageType::GetResult,
    })
}

fn set(request: Request<'_>) -> Result<Action, ValueError> {
    let payload = request.message.payload();
    Ok(Action::Store {
        op: Operation::Set {
            key: key(payload)?,
            value: payload.require("value")?.clone(),
            ttl: positive_millis(payload, "ttl_ms")?,
        },
        reply: MessageType::SetResult,
    })
}

fn delete(request: Request<'_>) -> Result<Action, ValueError> {
    Ok(Action::Store {
        op: Operation::Delete {
            key: key(request.message.payload())?,
        },
        reply: MessageType::DeleteResult,
    })
}

fn incr(request: Request<'_>) -> Result<Action, ValueError> {
    let payload = request.message.payload();
    Ok(Action::Store {
        op: Operation::Incr {
            key: key(payload)?,
            by: payload.optional_i64("by")?.unwrap_or(1),
        },
        reply: MessageType::IncrResult,
    })
}

fn hset(request: Request<'_>) -> Result<Action, ValueError> {
    let payload = request.message.payload();
    let fields = payload.require_object("fields")?;
    if fields.is_empty() {
        return Err(ValueError::invalid("fields", "must not be empty"));
    }
    Ok(Action::Store {
        op: Operation::HashSet {
            key: key(payload)?,
            fields: fields.clone(),
        },
        reply: MessageType::HsetResult,
    })
}

fn hgetall(request: Request<'_>) -> Result<Action, ValueError> {
    Ok(Action::Store {
        op: Operation::HashGetAll {
            key: key(request.message.payload())?,
        },
        reply: MessageType::HgetallResult,
    })
}

fn session_get(request: Request<'_>) -> Result<Action, ValueError> {
    let key = key(request.message.payload())?;
    let value = request.session.get(&key).cloned().unwrap_or_default();
    Ok(Action::Reply {
        kind: MessageType::SessionResult,
        payload: Value::object([("key", Value::from(key)), ("value", value)]),
    })
}

fn session_set(request: Request<'_>) -> Result<Action, ValueError> {
    let payload = request.message.payload();
    let key = key(payload)?;
    let value = payload.require("value")?.clone();
    request.session.set(&key, value.clone());
    Ok(Action::Reply {
        kind: MessageType::SessionResult,
        payload: Value::object([("key", Value::from(key)), ("value", value)]),
    })
}

fn subscribe(request: Request<'_>) -> Result<Action, ValueError> {
    Ok(Action::Subscribe {
        topic: topic(request.message.payload())?,
    })
}

fn unsubscribe(request: Request<'_>) -> Result<Action, ValueError> {
    Ok(Action::Unsubscribe {
        topic: topic(request.message.payload())?,
    })
}

fn publish(request: Request<'_>) -> Result<Action, ValueError> {
    let payload = request.message.payload();
    Ok(Action::Publish {
        topic: topic(payload)?,
        data: payload.get("data").cloned().unwrap_or_default(),
    })
}

fn fetch(request: Request<'_>) -> Result<Action, ValueError> {
    let payload = request.message.payload();
    let method = payload.optional_str("method")?.unwrap_or("GET");
    let path = payload.require_str("path")?;
    let mut call = CallRequest::new(method, path);

    if let Some(headers) = payload.optional_object("headers")? {
        for (name, value) in headers {
            let value = value.as_str().ok_or_else(|| ValueError::Mismatch {
                field: format!("headers.{name}"),
                expected: "a string",
                found: value.kind(),
            })?;
            call = call.header(name.as_str(), value);
        }
    }

    match payload.get("body") {
        None | Some(Value::Null) => {}
        Some(Value::String(text)) => call = call.body(text.as_bytes()),
        Some(other) => {
            let json = serde_json::to_vec(other)
                .map_err(|_err| ValueError::invalid("body", "cannot be encoded"))?;
            call = call.header("content-type", "application/json").body(json);
        }
    }

    if let Some(timeout) = positive_millis(payload, "timeout_ms")? {
        call = call.timeout(timeout);
    }
    Ok(Action::Fetch { request: call })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use switchboard_types::CorrelationId;

    use super::*;

    fn route(kind: MessageType, payload: &serde_json::Value) -> Result<Action, RouteError> {
        let mut session = Session::default();
        route_with(&mut session, kind, payload)
    }

    fn route_with(
        session: &mut Session,
        kind: MessageType,
        payload: &serde_json::Value,
    ) -> Result<Action, RouteError> {
        let message = Message::new(
            kind,
            Some(CorrelationId::from("1")),
            Value::from(payload.clone()),
        );
        Router::new().route(Request {
            connection: ConnectionId::new(0, 0),
            message: &message,
            session,
        })
    }

    #[test]
    fn get_becomes_store_read() {
        let action = route(MessageType::Get, &serde_json::json!({"key": "k"})).unwrap();
        assert_eq!(
            action,
            Action::Store {
                op: Operation::Get { key: "k".to_owned() },
                reply: MessageType::GetResult,
            }
        );
    }

    #[test]
    fn set_carries_ttl() {
        let action = route(
            MessageType::Set,
            &serde_json::json!({"key": "k", "value": [1, 2], "ttl_ms": 1500}),
        )
        .unwrap();
        let Action::Store {
            op: Operation::Set { ttl, value, .. },
            ..
        } = action
        else {
            panic!("expected a set");
        };
        assert_eq!(ttl, Some(Duration::from_millis(1500)));
        assert_eq!(value.as_array().map(<[Value]>::len), Some(2));
    }

    #[test]
    fn bad_payloads_are_invalid_payload() {
        for (kind, payload) in [
            (MessageType::Get, serde_json::json!({})),
            (MessageType::Get, serde_json::json!({"key": ""})),
            (MessageType::Set, serde_json::json!({"key": "k"})),
            (MessageType::Set, serde_json::json!({"key": "k", "value": 1, "ttl_ms": 0})),
            (MessageType::Incr, serde_json::json!({"key": "k", "by": "two"})),
            (MessageType::Hset, serde_json::json!({"key": "h", "fields": {}})),
            (MessageType::Fetch, serde_json::json!({"method": "GET"})),
            (MessageType::Subscribe, serde_json::json!({"topic": 3})),
        ] {
            let err = route(kind, &payload).unwrap_err();
            assert_eq!(err.reason(), "invalid_payload", "{kind} {payload}");
        }
    }

    #[test]
    fn hello_and_responses_are_unsupported() {
        for kind in [MessageType::Hello, MessageType::GetResult, MessageType::Error] {
            let err = route(kind, &serde_json::json!({})).unwrap_err();
            assert_eq!(err, RouteError::Unsupported(kind));
            assert_eq!(err.reason(), "unsupported");
        }
    }

    #[test]
    fn session_values_are_answered_locally() {
        let mut session = Session::default();
        route_with(
            &mut session,
            MessageType::SessionSet,
            &serde_json::json!({"key": "name", "value": "ada"}),
        )
        .unwrap();
        let action = route_with(
            &mut session,
            MessageType::SessionGet,
            &serde_json::json!({"key": "name"}),
        )
        .unwrap();
        assert_eq!(
            action,
            Action::Reply {
                kind: MessageType::SessionResult,
                payload: Value::object([
                    ("key", Value::from("name")),
                    ("value", Value::from("ada")),
                ]),
            }
        );
    }

    #[test]
    fn fetch_defaults_to_get_and_encodes_json_body() {
        let action = route(
            MessageType::Fetch,
            &serde_json::json!({
                "method": "post",
                "path": "/items",
                "headers": {"x-tag": "a"},
                "body": {"n": 1},
                "timeout_ms": 250
            }),
        )
        .unwrap();
        let Action::Fetch { request } = action else {
            panic!("expected a fetch");
        };
        assert_eq!(request.method, "post");
        assert_eq!(request.path, "/items");
        assert_eq!(request.body.as_deref(), Some(br#"{"n":1}"#.as_slice()));
        assert_eq!(request.timeout, Some(Duration::from_millis(250)));
        assert!(request.headers.contains(&("x-tag".to_owned(), "a".to_owned())));

        let Action::Fetch { request } =
            route(MessageType::Fetch, &serde_json::json!({"path": "/"})).unwrap()
        else {
            panic!("expected a fetch");
        };
        assert_eq!(request.method, "GET");
    }

    #[test]
    fn store_payload_names_field_by_reply_type() {
        assert_eq!(
            store_payload(MessageType::GetResult, Reply::Value(Some(Value::Int(5)))),
            Value::object([("value", Value::Int(5))])
        );
        assert_eq!(
            store_payload(MessageType::SetResult, Reply::Stored),
            Value::object([("ok", Value::Bool(true))])
        );
        assert_eq!(
            store_payload(MessageType::DeleteResult, Reply::Count(1)),
            Value::object([("deleted", Value::Int(1))])
        );
    }
}
