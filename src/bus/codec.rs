//! Wire format of requests and replies on the event bus
//!
//! A request body is a JSON object holding the payload (an empty body is an
//! empty payload); the operation comes from the subject. A success reply
//! body is the encoded result; a failure reply carries its code in the
//! [`FAILURE_CODE_HEADER`] header and its message as the body.

use crate::error::{BackboneError, Result};
use crate::types::{Failure, Payload, Reply, ReplyBody, Request};
use bytes::Bytes;

/// Header carrying the failure code of a failure reply
pub const FAILURE_CODE_HEADER: &str = "Backbone-Failure-Code";

/// A reply ready to be published
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedReply {
    /// Set for failure replies only
    pub failure_code: Option<u16>,
    pub body: Bytes,
}

/// Decode a request addressed to `operation_subject`
pub fn decode_request(operation_subject: &str, body: &[u8]) -> Result<Request> {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Payload::new()
    } else {
        serde_json::from_slice::<Payload>(body).map_err(|e| {
            BackboneError::InvalidPayload(format!("request body is not a JSON object: {}", e))
        })?
    };
    Ok(Request::new(operation_subject, payload))
}

/// Encode a reply for publishing
pub fn encode_reply(reply: &Reply) -> EncodedReply {
    match reply {
        Reply::Success(ReplyBody::Bool(b)) => EncodedReply {
            failure_code: None,
            body: if *b {
                Bytes::from_static(b"true")
            } else {
                Bytes::from_static(b"false")
            },
        },
        Reply::Success(ReplyBody::Serialized(bytes)) => EncodedReply {
            failure_code: None,
            body: bytes.clone(),
        },
        Reply::Failure(failure) => EncodedReply {
            failure_code: Some(failure.code),
            body: Bytes::from(failure.message.clone()),
        },
    }
}

/// Decode a received reply
///
/// Success bodies come back as [`ReplyBody::Serialized`]; a boolean reply
/// is the JSON text `true` or `false`.
pub fn decode_reply(failure_code: Option<&str>, body: Bytes) -> Result<Reply> {
    match failure_code {
        None => Ok(Reply::Success(ReplyBody::Serialized(body))),
        Some(code) => {
            let code = code.trim().parse::<u16>().map_err(|e| {
                BackboneError::InvalidPayload(format!("bad {} header '{}': {}", FAILURE_CODE_HEADER, code, e))
            })?;
            Ok(Reply::Failure(Failure {
                code,
                message: String::from_utf8_lossy(&body).into_owned(),
            }))
        }
    }
}
