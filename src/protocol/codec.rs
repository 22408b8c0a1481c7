//! JSON wire codec.
//!
//! Outbound requests encode as `{"id", "command", "payload"}`. Inbound
//! frames are recognised by shape, checked in this order:
//!
//! | Shape | Frame |
//! |---|---|
//! | `{"id": .., "result": ..}` | [`InboundFrame::Response`] (success) |
//! | `{"id": .., "error": {"code", "message", "data"}}` | [`InboundFrame::Response`] (failure) |
//! | `{"type": "..", ..}` | [`InboundFrame::Event`], whatever other fields it carries |
//! | `{"lifecycle": {"connected": .., "error": ..}}` | [`InboundFrame::Lifecycle`] |
//!
//! Anything else is a [`RpcError::Protocol`].

use bytes::Bytes;
use serde_json::{Map, Value};

use super::{InboundFrame, LifecycleFrame, PushedEvent, RequestFrame, ResponseFrame};
use crate::error::RemoteError;
use crate::{CorrelationId, Result, RpcError};

/// Encode an outbound request.
pub fn encode_request(frame: &RequestFrame) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(frame)?))
}

/// Decode an outbound request; used by peers and test harnesses.
pub fn decode_request(bytes: &[u8]) -> Result<RequestFrame> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode an inbound frame; the inverse of [`decode_inbound`].
pub fn encode_inbound(frame: &InboundFrame) -> Result<Bytes> {
    // ---
    let value = match frame {
        InboundFrame::Response(ResponseFrame { id, outcome: Ok(result) }) => {
            serde_json::json!({ "id": id, "result": result })
        }
        InboundFrame::Response(ResponseFrame { id, outcome: Err(error) }) => {
            serde_json::json!({ "id": id, "error": error })
        }
        InboundFrame::Event(event) => serde_json::to_value(event)?,
        InboundFrame::Lifecycle(lifecycle) => serde_json::json!({ "lifecycle": lifecycle }),
    };
    Ok(Bytes::from(serde_json::to_vec(&value)?))
}

/// Decode one inbound frame.
pub fn decode_inbound(bytes: &[u8]) -> Result<InboundFrame> {
    // ---
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Object(mut object) = value else {
        return Err(RpcError::Protocol("inbound frame is not a JSON object".into()));
    };

    // A response needs an answer field; `id` alone is common on events too.
    let answered = object.contains_key("result") || object.contains_key("error");
    if answered {
        if let Some(id) = object.remove("id") {
            return decode_response(id, object).map(InboundFrame::Response);
        }
    }

    if matches!(object.get("type"), Some(Value::String(_))) {
        let event: PushedEvent = serde_json::from_value(Value::Object(object))?;
        return Ok(InboundFrame::Event(event));
    }

    if let Some(lifecycle) = object.remove("lifecycle") {
        let lifecycle: LifecycleFrame = serde_json::from_value(lifecycle)?;
        return Ok(InboundFrame::Lifecycle(lifecycle));
    }

    match object.get("id") {
        Some(id) => Err(RpcError::Protocol(format!(
            "response {id} carries neither result nor error"
        ))),
        None => Err(RpcError::Protocol(
            "unrecognised frame: expected response, typed event, or lifecycle".into(),
        )),
    }
}

fn decode_response(id: Value, mut object: Map<String, Value>) -> Result<ResponseFrame> {
    // ---
    let id = match id {
        Value::String(s) => CorrelationId::from(s),
        Value::Number(n) => CorrelationId::from(n.to_string()),
        other => {
            return Err(RpcError::Protocol(format!(
                "response id must be a string or number, got {other}"
            )))
        }
    };

    if let Some(error) = object.remove("error") {
        let error: RemoteError = serde_json::from_value(error)?;
        return Ok(ResponseFrame::err(id, error));
    }

    match object.remove("result") {
        Some(result) => Ok(ResponseFrame::ok(id, result)),
        None => Err(RpcError::Protocol(format!(
            "response {id} carries neither result nor error"
        ))),
    }
}
