//! Wire message vocabulary and codec for the pocketagent bridge protocol.
//!
//! Every wire message is one JSON object with a `type` discriminator.
//! Client field names are camelCase, discriminators snake_case. Unknown
//! discriminators are hard decode failures, never silent drops.

mod codec;
mod message;
mod value;

pub use codec::{
    CLIENT_MESSAGE_TYPES, DecodeError, SERVER_MESSAGE_TYPES, STREAM_CONTENT_TYPES, decode_server,
    decode_server_str, encode_client, encode_client_string,
};
pub use message::{
    ClientMessage, ImageAttachment, PermissionMode, ServerMessage, SessionLifecycle, StreamContent,
    Usage,
};
pub use value::DynamicValue;
