//! Envelope encoding and validated decoding of JSON-RPC messages.

use serde_json::{Map, Value};

use crate::types::request::json_type_name;
use crate::types::{
    DecodeError, JsonRpcError, JsonRpcErrorObject, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, McpError, McpResult, RequestId, JSONRPC_VERSION,
};

/// Serialize a message to its single-line wire form (no trailing newline).
///
/// Messages that [`decode`] would not give back unchanged are refused.
pub fn encode(message: &JsonRpcMessage) -> McpResult<String> {
    check_envelope(message)?;
    Ok(serde_json::to_string(message)?)
}

fn check_envelope(message: &JsonRpcMessage) -> McpResult<()> {
    let (jsonrpc, method, params) = match message {
        JsonRpcMessage::Request(r) => (&r.jsonrpc, Some(&r.method), r.params.as_ref()),
        JsonRpcMessage::Notification(n) => (&n.jsonrpc, Some(&n.method), n.params.as_ref()),
        JsonRpcMessage::Response(r) => (&r.jsonrpc, None, None),
        JsonRpcMessage::Error(e) => (&e.jsonrpc, None, None),
    };
    if jsonrpc != JSONRPC_VERSION {
        return Err(McpError::InvalidRequest(format!(
            "jsonrpc must be \"{JSONRPC_VERSION}\", got \"{jsonrpc}\""
        )));
    }
    if method.is_some_and(|m| m.is_empty()) {
        return Err(McpError::InvalidRequest(
            "method must be a non-empty string".to_string(),
        ));
    }
    match params {
        None | Some(Value::Object(_) | Value::Array(_)) => Ok(()),
        Some(other) => Err(McpError::InvalidParams(format!(
            "params must be an object or array, got {}",
            json_type_name(other)
        ))),
    }
}

/// Parse and validate one complete frame.
pub fn decode(text: &str) -> Result<JsonRpcMessage, DecodeError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::parse("Empty message"));
    }
    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| DecodeError::parse(e.to_string()))?;
    decode_value(value)
}

/// Validate an already-parsed JSON value as a JSON-RPC envelope.
pub fn decode_value(value: Value) -> Result<JsonRpcMessage, DecodeError> {
    let Value::Object(mut obj) = value else {
        return Err(DecodeError::parse("Message must be a JSON object"));
    };

    let has_method = obj.contains_key("method");
    let raw_id = obj.remove("id");
    let id = raw_id.as_ref().and_then(recover_id);
    let malformed = |message: String| DecodeError::malformed(message, id.clone(), has_method);

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(malformed(format!(
                "Expected jsonrpc version \"{JSONRPC_VERSION}\", got \"{other}\""
            )))
        }
        None => return Err(malformed("Missing jsonrpc version marker".to_string())),
    }

    if let Some(raw) = &raw_id {
        if id.is_none() {
            return Err(malformed(format!("id must be a string or integer, got {raw}")));
        }
    }

    if has_method {
        if obj.contains_key("result") || obj.contains_key("error") {
            return Err(malformed(
                "A message with a method must not carry result or error".to_string(),
            ));
        }
        let method = match obj.remove("method") {
            Some(Value::String(m)) if !m.is_empty() => m,
            _ => return Err(malformed("method must be a non-empty string".to_string())),
        };
        let params = match obj.remove("params") {
            None | Some(Value::Null) => None,
            Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p),
            Some(_) => return Err(malformed("params must be an object or array".to_string())),
        };
        return Ok(match id.clone() {
            Some(id) => JsonRpcMessage::Request(JsonRpcRequest {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                method,
                params,
            }),
            None => JsonRpcMessage::Notification(JsonRpcNotification {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method,
                params,
            }),
        });
    }

    let Some(id) = id.clone() else {
        return Err(malformed("Message has neither method nor id".to_string()));
    };

    match (obj.remove("result"), obj.remove("error")) {
        (Some(result), None) => Ok(JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        })),
        (None, Some(error)) => {
            let error = decode_error_object(error).map_err(malformed)?;
            Ok(JsonRpcMessage::Error(JsonRpcError {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                error,
            }))
        }
        (Some(_), Some(_)) => Err(malformed(
            "Response must carry exactly one of result or error".to_string(),
        )),
        (None, None) => Err(malformed("Response carries neither result nor error".to_string())),
    }
}

fn recover_id(raw: &Value) -> Option<RequestId> {
    match raw {
        Value::String(s) => Some(RequestId::String(s.clone())),
        Value::Number(n) => n.as_i64().map(RequestId::Number),
        _ => None,
    }
}

fn decode_error_object(value: Value) -> Result<JsonRpcErrorObject, String> {
    let Value::Object(mut obj) = value else {
        return Err("error must be an object".to_string());
    };
    let code = obj
        .get("code")
        .and_then(Value::as_i64)
        .and_then(|c| i32::try_from(c).ok())
        .ok_or_else(|| "error.code must be an integer".to_string())?;
    let message = match obj.remove("message") {
        Some(Value::String(m)) => m,
        _ => return Err("error.message must be a string".to_string()),
    };
    let data = obj.remove("data");
    Ok(JsonRpcErrorObject {
        code,
        message,
        data,
    })
}

/// Convenience for building an empty object result (`{}`).
pub fn empty_result() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(message: JsonRpcMessage) {
        let wire = encode(&message).unwrap();
        assert_eq!(decode(&wire).unwrap(), message, "wire: {wire}");
    }

    fn params_cases() -> Vec<Option<Value>> {
        vec![
            None,
            Some(Value::Null),
            Some(json!(5)),
            Some(json!("text")),
            Some(json!(true)),
            Some(json!({})),
            Some(json!({ "name": "echo", "arguments": { "text": null } })),
            Some(json!([])),
            Some(json!([1, "two", null])),
        ]
    }

    /// Every message either encodes to something that decodes back to it, or
    /// is refused by `encode`.
    fn encodes_faithfully_or_not_at_all(message: JsonRpcMessage) {
        if let Ok(wire) = encode(&message) {
            assert_eq!(decode(&wire).unwrap(), message, "wire: {wire}");
        }
    }

    #[test]
    fn constructed_messages_survive_encoding() {
        for params in params_cases() {
            for id in [RequestId::from(7i64), RequestId::from("abc"), RequestId::from(-1i64)] {
                let request = JsonRpcRequest::new(id, "tools/call", params.clone());
                encodes_faithfully_or_not_at_all(request.into());
            }
            let notification = JsonRpcNotification::new("notifications/message", params);
            encodes_faithfully_or_not_at_all(notification.into());
        }
        for result in [Value::Null, json!(0), json!("s"), json!({ "tools": [] }), json!([])] {
            roundtrip(JsonRpcResponse::new(8i64.into(), result).into());
        }
        let mut err = JsonRpcError::new("x".into(), -32601, "Method not found".to_string());
        roundtrip(err.clone().into());
        err.error.data = Some(Value::Null);
        roundtrip(err.into());
    }

    #[test]
    fn structured_and_null_params_encode() {
        roundtrip(JsonRpcRequest::new(7i64.into(), "tools/list", None).into());
        roundtrip(JsonRpcRequest::new(7i64.into(), "tools/list", Some(json!({}))).into());
        roundtrip(JsonRpcNotification::new("n", Some(json!([1, 2]))).into());

        let request = JsonRpcRequest::new(1i64.into(), "tools/list", Some(Value::Null));
        assert_eq!(request.params, None);
        roundtrip(request.into());
    }

    #[test]
    fn scalar_params_and_bad_envelopes_are_refused() {
        let scalar = JsonRpcNotification::new("x", Some(json!(5)));
        assert_eq!(encode(&scalar.into()).unwrap_err().code(), -32602);

        let null_params = JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: 1i64.into(),
            method: "tools/list".to_string(),
            params: Some(Value::Null),
        });
        assert_eq!(encode(&null_params).unwrap_err().code(), -32602);

        let old_version = JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: "1.0".to_string(),
            id: 1i64.into(),
            result: json!({}),
        });
        assert_eq!(encode(&old_version).unwrap_err().code(), -32600);

        let unnamed = JsonRpcNotification::new("", None);
        assert_eq!(encode(&unnamed.into()).unwrap_err().code(), -32600);
    }

    #[test]
    fn error_data_survives_encoding() {
        let mut err = JsonRpcError::new(3i64.into(), -32602, "bad".to_string());
        err.error.data = Some(json!({ "field": "text" }));
        roundtrip(err.into());
    }

    #[test]
    fn garbage_is_an_unrecoverable_parse_error() {
        let err = decode(r#"{"broken":"#).unwrap_err();
        assert_eq!(err.code(), -32700);
        assert!(err.is_unrecoverable());

        assert!(decode("").unwrap_err().is_unrecoverable());
        assert!(decode("[1,2]").unwrap_err().is_unrecoverable());
    }

    #[test]
    fn missing_version_marker_keeps_request_id() {
        let err = decode(r#"{"id":5,"method":"ping"}"#).unwrap_err();
        assert_eq!(err.reply_id(), Some(&RequestId::Number(5)));
    }

    #[test]
    fn float_and_null_ids_are_rejected() {
        let err = decode(r#"{"jsonrpc":"2.0","id":1.5,"method":"ping"}"#).unwrap_err();
        assert!(err.has_method);
        assert!(err.reply_id().is_none());

        let err = decode(r#"{"jsonrpc":"2.0","id":null,"result":{}}"#).unwrap_err();
        assert!(err.is_unrecoverable());
    }

    #[test]
    fn result_and_error_are_exclusive() {
        let err = decode(r#"{"jsonrpc":"2.0","id":2,"result":{},"error":{"code":1,"message":"x"}}"#)
            .unwrap_err();
        assert_eq!(err.id, Some(RequestId::Number(2)));
        assert!(err.reply_id().is_none());

        assert!(decode(r#"{"jsonrpc":"2.0","id":2}"#).is_err());
    }

    #[test]
    fn error_objects_need_code_and_message() {
        assert!(decode(r#"{"jsonrpc":"2.0","id":2,"error":{"message":"x"}}"#).is_err());
        assert!(decode(r#"{"jsonrpc":"2.0","id":2,"error":{"code":-1}}"#).is_err());
    }

    #[test]
    fn method_with_result_is_rejected() {
        let err = decode(r#"{"jsonrpc":"2.0","id":"r","method":"ping","result":1}"#).unwrap_err();
        assert_eq!(err.reply_id(), Some(&RequestId::String("r".to_string())));
    }

    #[test]
    fn scalar_params_are_rejected() {
        assert!(decode(r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":3}"#).is_err());
    }

    #[test]
    fn serde_goes_through_the_validating_decoder() {
        let parsed: Result<JsonRpcMessage, _> =
            serde_json::from_value(json!({ "jsonrpc": "1.0", "id": 1, "method": "ping" }));
        assert!(parsed.is_err());
    }
}
