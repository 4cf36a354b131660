//! Event-bus transport
//!
//! - **codec**: request and reply wire format
//! - **nats**: NATS queue-group binding serving a [`Dispatcher`](crate::Dispatcher)

pub mod codec;
pub mod nats;

pub use codec::{decode_reply, decode_request, encode_reply, EncodedReply, FAILURE_CODE_HEADER};
pub use nats::NatsBinding;
