//! Engine.IO v4 framing with Socket.IO v4 packets riding inside `message`
//! frames. Only the default namespace and text payloads are handled.

use serde::Deserialize;
use serde_json::Value;

use crate::runtime::TransportError;

/// Separator between packets in a long-poll payload.
pub const RECORD_SEPARATOR: char = '\x1e';

pub const PROBE: &str = "probe";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl Handshake {
    pub fn offers_websocket(&self) -> bool {
        self.upgrades.iter().any(|u| u == "websocket")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            // clients never send open
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }

    pub fn decode(raw: &str) -> Result<Self, TransportError> {
        let mut chars = raw.chars();
        let kind = chars
            .next()
            .ok_or_else(|| TransportError::Protocol("empty engine packet".into()))?;
        let data = chars.as_str();

        match kind {
            '0' => serde_json::from_str(data)
                .map(EnginePacket::Open)
                .map_err(|e| TransportError::Protocol(format!("bad handshake: {}", e))),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(data.to_string())),
            '3' => Ok(EnginePacket::Pong(data.to_string())),
            '4' => Ok(EnginePacket::Message(data.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(TransportError::Protocol(format!("unknown engine packet type {:?}", other))),
        }
    }
}

pub fn encode_payload(packets: &[EnginePacket]) -> String {
    packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Vec<_>>()
        .join(&RECORD_SEPARATOR.to_string())
}

pub fn decode_payload(payload: &str) -> Result<Vec<EnginePacket>, TransportError> {
    payload
        .split(RECORD_SEPARATOR)
        .filter(|p| !p.is_empty())
        .map(EnginePacket::decode)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Value },
    ConnectError(Value),
}

impl SocketPacket {
    pub fn connect_with_token(token: &str) -> Self {
        SocketPacket::Connect(Some(serde_json::json!({ "token": token })))
    }

    pub fn event(name: &str, data: Value) -> Self {
        SocketPacket::Event {
            name: name.to_string(),
            data,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(Some(auth)) => format!("0{}", auth),
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { name, data } => {
                format!("2{}", Value::Array(vec![Value::String(name.clone()), data.clone()]))
            }
            SocketPacket::ConnectError(data) => format!("4{}", data),
        }
    }

    pub fn into_engine(self) -> EnginePacket {
        EnginePacket::Message(self.encode())
    }

    /// Returns `None` for packet types this client does not act on (acks,
    /// binary events) and for anything addressed to a namespace other than
    /// the default one.
    pub fn decode(raw: &str) -> Result<Option<Self>, TransportError> {
        let mut chars = raw.chars();
        let kind = chars
            .next()
            .ok_or_else(|| TransportError::Protocol("empty socket packet".into()))?;
        let (namespace, body) = split_namespace(chars.as_str());
        if namespace != DEFAULT_NAMESPACE {
            debug!("Ignoring packet for namespace {}", namespace);
            return Ok(None);
        }
        let body = strip_ack_id(body);

        let json = |body: &str| -> Result<Option<Value>, TransportError> {
            if body.is_empty() {
                return Ok(None);
            }
            serde_json::from_str(body)
                .map(Some)
                .map_err(|e| TransportError::Protocol(format!("bad socket payload: {}", e)))
        };

        let packet = match kind {
            '0' => SocketPacket::Connect(json(body)?),
            '1' => SocketPacket::Disconnect,
            '2' => {
                let Some(Value::Array(mut args)) = json(body)? else {
                    return Err(TransportError::Protocol(format!("event without arguments: {}", raw)));
                };
                if args.is_empty() {
                    return Err(TransportError::Protocol("event without a name".into()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => return Err(TransportError::Protocol(format!("event name is not a string: {}", other))),
                };
                let data = if args.is_empty() { Value::Null } else { args.remove(0) };
                SocketPacket::Event { name, data }
            }
            '4' => SocketPacket::ConnectError(json(body)?.unwrap_or(Value::Null)),
            '3' | '5' | '6' => return Ok(None),
            other => return Err(TransportError::Protocol(format!("unknown socket packet type {:?}", other))),
        };

        Ok(Some(packet))
    }
}

const DEFAULT_NAMESPACE: &str = "/";

fn split_namespace(body: &str) -> (&str, &str) {
    if !body.starts_with('/') {
        return (DEFAULT_NAMESPACE, body);
    }
    match body.find(',') {
        Some(pos) => (&body[..pos], &body[pos + 1..]),
        None => (body, ""),
    }
}

fn strip_ack_id(body: &str) -> &str {
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

/// Best-effort human text for a `connect_error` payload.
pub fn rejection_reason(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handshake_decoding() {
        let packet = EnginePacket::decode(
            r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();

        let EnginePacket::Open(handshake) = packet else {
            panic!("expected open packet");
        };
        assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
        assert!(handshake.offers_websocket());
        assert_eq!(handshake.ping_interval, 25_000);
    }

    #[test]
    fn test_payload_splitting() {
        let packets = decode_payload("2\x1e42[\"new_message\",{}]\x1e6").unwrap();
        assert_eq!(
            packets,
            vec![
                EnginePacket::Ping(String::new()),
                EnginePacket::Message(r#"2["new_message",{}]"#.to_string()),
                EnginePacket::Noop,
            ]
        );
        assert_eq!(encode_payload(&packets), "2\x1e42[\"new_message\",{}]\x1e6");
        assert!(matches!(EnginePacket::decode("9"), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn test_probe_frames() {
        assert_eq!(EnginePacket::Ping(PROBE.into()).encode(), "2probe");
        assert_eq!(EnginePacket::decode("3probe").unwrap(), EnginePacket::Pong(PROBE.into()));
        assert_eq!(EnginePacket::Upgrade.encode(), "5");
    }

    #[test]
    fn test_socket_connect_and_event_encoding() {
        assert_eq!(
            SocketPacket::connect_with_token("abc").into_engine().encode(),
            r#"40{"token":"abc"}"#
        );
        assert_eq!(
            SocketPacket::event("join_chat", json!("user-1")).into_engine().encode(),
            r#"42["join_chat","user-1"]"#
        );
        assert_eq!(SocketPacket::Disconnect.into_engine().encode(), "41");
    }

    #[test]
    fn test_socket_decoding() {
        assert_eq!(
            SocketPacket::decode(r#"0{"sid":"x1"}"#).unwrap(),
            Some(SocketPacket::Connect(Some(json!({"sid":"x1"}))))
        );
        assert_eq!(
            SocketPacket::decode(r#"2["new_notification",{"id":"n1"},"extra"]"#).unwrap(),
            Some(SocketPacket::event("new_notification", json!({"id":"n1"})))
        );
        assert_eq!(
            SocketPacket::decode(r#"217["ping"]"#).unwrap(),
            Some(SocketPacket::event("ping", Value::Null))
        );
        assert_eq!(
            SocketPacket::decode(r#"2/,["new_message",{"id":"m1"}]"#).unwrap(),
            Some(SocketPacket::event("new_message", json!({"id":"m1"})))
        );
        // other namespaces are not ours to dispatch
        assert_eq!(
            SocketPacket::decode(r#"2/admin,17["new_message",{"id":"m1"}]"#).unwrap(),
            None
        );
        assert_eq!(SocketPacket::decode("1/admin,").unwrap(), None);
        assert_eq!(
            SocketPacket::decode(r#"4{"message":"Authentication error"}"#).unwrap(),
            Some(SocketPacket::ConnectError(json!({"message":"Authentication error"})))
        );
        assert_eq!(SocketPacket::decode(r#"3["ack"]"#).unwrap(), None);
        assert!(SocketPacket::decode("2{}").is_err());
    }

    #[test]
    fn test_rejection_reason() {
        assert_eq!(rejection_reason(&json!({"message":"jwt expired"})), "jwt expired");
        assert_eq!(rejection_reason(&json!("nope")), "\"nope\"");
    }
}
