//! Wire envelope: parses/serializes the JSON array protocol, and classifies
//! the string-literal faults the pipeline's `ProtocolValidator` stage needs
//! to distinguish (SPEC_FULL §4.1).

use serde_json::Value;

use crate::error::CodecError;
use crate::event::Event;
use crate::filter::Filter;

/// Client → relay envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Event(Box<Event>),
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Close(String),
    Count {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Auth(Box<Event>),
    NegOpen {
        subscription_id: String,
        filter: Box<Filter>,
        id_size: u8,
        initial_message: String,
    },
    NegMsg {
        subscription_id: String,
        message: String,
    },
    NegClose {
        subscription_id: String,
    },
}

/// Relay → client envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Box<Event>,
    },
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Eose {
        subscription_id: String,
    },
    Closed {
        subscription_id: String,
        message: String,
    },
    Notice {
        message: String,
    },
    Auth {
        challenge: String,
    },
    Count {
        subscription_id: String,
        count: u64,
        approximate: Option<bool>,
    },
    NegMsg {
        subscription_id: String,
        message: String,
    },
    NegErr {
        subscription_id: String,
        message: String,
    },
}

impl RelayMessage {
    pub fn event(subscription_id: impl Into<String>, event: Event) -> Self {
        Self::Event {
            subscription_id: subscription_id.into(),
            event: Box::new(event),
        }
    }

    pub fn ok(event_id: impl Into<String>, accepted: bool, message: impl Into<String>) -> Self {
        Self::Ok {
            event_id: event_id.into(),
            accepted,
            message: message.into(),
        }
    }

    pub fn eose(subscription_id: impl Into<String>) -> Self {
        Self::Eose {
            subscription_id: subscription_id.into(),
        }
    }

    pub fn closed(subscription_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Closed {
            subscription_id: subscription_id.into(),
            message: message.into(),
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Self::Notice {
            message: message.into(),
        }
    }

    pub fn auth(challenge: impl Into<String>) -> Self {
        Self::Auth {
            challenge: challenge.into(),
        }
    }

    pub fn count(subscription_id: impl Into<String>, count: u64, approximate: Option<bool>) -> Self {
        Self::Count {
            subscription_id: subscription_id.into(),
            count,
            approximate,
        }
    }

    /// Compact JSON wire form, e.g. `["OK","<id>",true,""]`. Hex fields are
    /// already lowercase by construction (the event model only ever produces
    /// lowercase hex).
    pub fn as_json(&self) -> String {
        let value = match self {
            RelayMessage::Event {
                subscription_id,
                event,
            } => Value::Array(vec![
                Value::String("EVENT".into()),
                Value::String(subscription_id.clone()),
                serde_json::to_value(event.as_ref()).unwrap_or(Value::Null),
            ]),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => Value::Array(vec![
                Value::String("OK".into()),
                Value::String(event_id.clone()),
                Value::Bool(*accepted),
                Value::String(message.clone()),
            ]),
            RelayMessage::Eose { subscription_id } => Value::Array(vec![
                Value::String("EOSE".into()),
                Value::String(subscription_id.clone()),
            ]),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => Value::Array(vec![
                Value::String("CLOSED".into()),
                Value::String(subscription_id.clone()),
                Value::String(message.clone()),
            ]),
            RelayMessage::Notice { message } => Value::Array(vec![
                Value::String("NOTICE".into()),
                Value::String(message.clone()),
            ]),
            RelayMessage::Auth { challenge } => Value::Array(vec![
                Value::String("AUTH".into()),
                Value::String(challenge.clone()),
            ]),
            RelayMessage::Count {
                subscription_id,
                count,
                approximate,
            } => {
                let mut payload = serde_json::Map::new();
                payload.insert("count".into(), Value::from(*count));
                if let Some(approx) = approximate {
                    payload.insert("approximate".into(), Value::Bool(*approx));
                }
                Value::Array(vec![
                    Value::String("COUNT".into()),
                    Value::String(subscription_id.clone()),
                    Value::Object(payload),
                ])
            }
            RelayMessage::NegMsg {
                subscription_id,
                message,
            } => Value::Array(vec![
                Value::String("NEG-MSG".into()),
                Value::String(subscription_id.clone()),
                Value::String(message.clone()),
            ]),
            RelayMessage::NegErr {
                subscription_id,
                message,
            } => Value::Array(vec![
                Value::String("NEG-ERR".into()),
                Value::String(subscription_id.clone()),
                Value::String(message.clone()),
            ]),
        };
        value.to_string()
    }
}

/// Walk a raw JSON source looking for the two string-literal faults the
/// protocol stage must distinguish from generic format errors. Runs before
/// handing the text to `serde_json`, since `serde_json` itself only reports
/// "invalid escape"/"control character" as opaque syntax errors.
fn scan_string_literal_faults(raw: &str) -> Result<(), CodecError> {
    const ALLOWED_SIMPLE_ESCAPES: &[u8] = b"\"\\nrtbf";
    let bytes = raw.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if b < 0x20 {
                return Err(CodecError::UnsupportedLiteral);
            }
            if b == b'\\' {
                let next = bytes.get(i + 1).copied();
                match next {
                    Some(c) if ALLOWED_SIMPLE_ESCAPES.contains(&c) => {
                        i += 2;
                        continue;
                    }
                    Some(b'u') => {
                        let hex = bytes.get(i + 2..i + 6);
                        let code_point = hex
                            .and_then(|h| std::str::from_utf8(h).ok())
                            .and_then(|h| u32::from_str_radix(h, 16).ok());
                        match code_point {
                            Some(cp) if cp >= 0x20 => {
                                i += 6;
                                continue;
                            }
                            _ => return Err(CodecError::UnsupportedEscape),
                        }
                    }
                    _ => return Err(CodecError::UnsupportedEscape),
                }
            }
            if b == b'"' {
                in_string = false;
            }
            i += 1;
        } else {
            if b == b'"' {
                in_string = true;
            }
            i += 1;
        }
    }
    Ok(())
}

/// Parse an inbound frame body into a typed [`ClientMessage`].
pub fn parse_client_message(raw: &str) -> Result<ClientMessage, CodecError> {
    scan_string_literal_faults(raw)?;

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| CodecError::InvalidFormat(e.to_string()))?;

    let arr = value
        .as_array()
        .ok_or_else(|| CodecError::InvalidFormat("top-level value is not an array".into()))?;
    if arr.is_empty() {
        return Err(CodecError::InvalidFormat("empty envelope array".into()));
    }
    let token = arr[0]
        .as_str()
        .ok_or_else(|| CodecError::InvalidFormat("envelope type is not a string".into()))?;

    match token {
        "EVENT" => {
            let event_value = arr
                .get(1)
                .ok_or_else(|| CodecError::InvalidFormat("EVENT missing payload".into()))?;
            let event: Event = serde_json::from_value(event_value.clone())
                .map_err(|e| CodecError::InvalidEvent(e.to_string()))?;
            Ok(ClientMessage::Event(Box::new(event)))
        }
        "AUTH" => {
            let event_value = arr
                .get(1)
                .ok_or_else(|| CodecError::InvalidFormat("AUTH missing payload".into()))?;
            let event: Event = serde_json::from_value(event_value.clone())
                .map_err(|e| CodecError::InvalidEvent(e.to_string()))?;
            Ok(ClientMessage::Auth(Box::new(event)))
        }
        "REQ" => {
            let sub_id = arr
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| CodecError::InvalidFormat("REQ missing subscription id".into()))?
                .to_string();
            let filters = parse_filters(&arr[2..])?;
            Ok(ClientMessage::Req {
                subscription_id: sub_id,
                filters,
            })
        }
        "COUNT" => {
            let sub_id = arr
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| CodecError::InvalidFormat("COUNT missing subscription id".into()))?
                .to_string();
            let filters = parse_filters(&arr[2..])?;
            Ok(ClientMessage::Count {
                subscription_id: sub_id,
                filters,
            })
        }
        "CLOSE" => {
            let sub_id = arr
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| CodecError::InvalidFormat("CLOSE missing subscription id".into()))?
                .to_string();
            Ok(ClientMessage::Close(sub_id))
        }
        "NEG-OPEN" => {
            if arr.len() < 5 {
                return Err(CodecError::InvalidFormat("NEG-OPEN arity".into()));
            }
            let sub_id = arr[1]
                .as_str()
                .ok_or_else(|| CodecError::InvalidFormat("NEG-OPEN subscription id".into()))?
                .to_string();
            let filter: Filter = serde_json::from_value(arr[2].clone())
                .map_err(|e| CodecError::InvalidFormat(e.to_string()))?;
            let id_size = arr[3].as_u64().unwrap_or(32) as u8;
            let initial_message = arr[4]
                .as_str()
                .ok_or_else(|| CodecError::InvalidFormat("NEG-OPEN initial message".into()))?
                .to_string();
            Ok(ClientMessage::NegOpen {
                subscription_id: sub_id,
                filter: Box::new(filter),
                id_size,
                initial_message,
            })
        }
        "NEG-MSG" => {
            if arr.len() < 3 {
                return Err(CodecError::InvalidFormat("NEG-MSG arity".into()));
            }
            let sub_id = arr[1]
                .as_str()
                .ok_or_else(|| CodecError::InvalidFormat("NEG-MSG subscription id".into()))?
                .to_string();
            let message = arr[2]
                .as_str()
                .ok_or_else(|| CodecError::InvalidFormat("NEG-MSG message".into()))?
                .to_string();
            Ok(ClientMessage::NegMsg {
                subscription_id: sub_id,
                message,
            })
        }
        "NEG-CLOSE" => {
            let sub_id = arr
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| CodecError::InvalidFormat("NEG-CLOSE subscription id".into()))?
                .to_string();
            Ok(ClientMessage::NegClose {
                subscription_id: sub_id,
            })
        }
        other => Err(CodecError::InvalidFormat(format!(
            "unsupported message type: {other}"
        ))),
    }
}

fn parse_filters(values: &[Value]) -> Result<Vec<Filter>, CodecError> {
    if values.is_empty() {
        return Err(CodecError::InvalidFormat("no filters supplied".into()));
    }
    values
        .iter()
        .map(|v| {
            serde_json::from_value(v.clone())
                .map_err(|e| CodecError::InvalidFormat(format!("bad filter: {e}")))
        })
        .collect()
}
