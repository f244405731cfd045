use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ERROR_KEY;
use crate::{CallError, HandlerError, Result};

/// Call envelope carried in the request body
/// 请求体中携带的调用信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Method name
    /// 方法名
    pub method: String,
    /// Call arguments, `null` when absent
    /// 调用参数，缺省时为 `null`
    #[serde(default)]
    pub args: Value,
}

impl CallEnvelope {
    /// Creates a new call envelope
    /// 创建一个新的调用信封
    pub fn new(method: impl Into<String>, args: Value) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    /// Decodes a call envelope from a request body
    /// 从请求体解码调用信封
    pub fn decode(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Result envelope carried in the response body
/// 响应体中携带的结果信封
///
/// On the wire a success is the raw value (or an empty body when the handler
/// produced no value) and a failure is `{ "$htTransportError": <message> }`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Handler result; `None` means no value at all, distinct from `null`
    /// 处理结果；`None` 表示没有值，与 `null` 不同
    Ok(Option<Value>),
    /// Handler failure message
    /// 处理失败信息
    Err(String),
}

impl Reply {
    /// Encodes the reply as a response body
    /// 将结果编码为响应体
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Reply::Ok(None) => Ok(Vec::new()),
            Reply::Ok(Some(value)) => Ok(serde_json::to_vec(value)?),
            Reply::Err(message) => {
                let mut map = Map::new();
                map.insert(ERROR_KEY.to_string(), Value::String(message.clone()));
                Ok(serde_json::to_vec(&Value::Object(map))?)
            }
        }
    }

    /// Decodes a response body
    /// 解码响应体
    ///
    /// A body that is not JSON is returned as the error, verbatim.
    pub fn decode(body: &[u8]) -> std::result::Result<Self, String> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Reply::Ok(None));
        }

        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(_) => return Err(String::from_utf8_lossy(body).into_owned()),
        };

        match value {
            Value::Object(mut map) if map.contains_key(ERROR_KEY) => {
                let message = match map.remove(ERROR_KEY) {
                    Some(Value::String(message)) => message,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Ok(Reply::Err(message))
            }
            value => Ok(Reply::Ok(Some(value))),
        }
    }

    /// Converts the reply into the client-facing result
    /// 转换为客户端结果
    pub fn into_result(self) -> std::result::Result<Option<Value>, CallError> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Err(message) => Err(CallError::Remote(message)),
        }
    }
}

impl From<std::result::Result<Option<Value>, HandlerError>> for Reply {
    fn from(result: std::result::Result<Option<Value>, HandlerError>) -> Self {
        match result {
            Ok(value) => Reply::Ok(value),
            Err(error) => Reply::Err(error.into_message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_envelope_args_default_to_null() {
        let envelope = CallEnvelope::decode(br#"{"method":"ping"}"#).unwrap();
        assert_eq!(envelope.method, "ping");
        assert_eq!(envelope.args, Value::Null);
    }

    #[test]
    fn test_call_envelope_rejects_missing_method() {
        assert!(CallEnvelope::decode(br#"{"args":[1,2]}"#).is_err());
        assert!(CallEnvelope::decode(b"not json").is_err());
    }

    #[test]
    fn test_error_reply_uses_reserved_key() {
        let body = Reply::Err("boom".into()).encode().unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({ "$htTransportError": "boom" }));
    }

    #[test]
    fn test_empty_body_is_no_value() {
        assert_eq!(Reply::Ok(None).encode().unwrap(), Vec::<u8>::new());
        assert_eq!(Reply::decode(b"").unwrap(), Reply::Ok(None));
        // `null` is a value, not the absence of one
        // `null` 是一个值，而不是没有值
        assert_eq!(Reply::decode(b"null").unwrap(), Reply::Ok(Some(Value::Null)));
    }

    #[test]
    fn test_plain_text_body_is_returned_verbatim() {
        let raw = Reply::decode(b"Internal Server Error").unwrap_err();
        assert_eq!(raw, "Internal Server Error");
    }

    #[test]
    fn test_non_string_error_marker_is_stringified() {
        let reply = Reply::decode(br#"{"$htTransportError":{"code":7}}"#).unwrap();
        assert_eq!(reply, Reply::Err(r#"{"code":7}"#.into()));
    }

    #[test]
    fn test_reply_from_handler_result() {
        let ok: Reply = Ok(Some(json!({ "a": [1, "ü"] }))).into();
        assert_eq!(ok.into_result().unwrap(), Some(json!({ "a": [1, "ü"] })));

        let err: Reply = Err(HandlerError::new("nope")).into();
        assert_eq!(err.into_result(), Err(CallError::Remote("nope".into())));
    }
}
