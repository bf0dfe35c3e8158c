//! MongoDB wire protocol (the subset needed for administrative commands)
//!
//! * BSON document model
//! * OP_MSG framing (single body section)
//! * Command failure extraction

pub mod constants;
pub mod decode;
mod document;
pub mod encode;
mod message;

pub use decode::{decode_document, decode_message};
pub use document::{Bson, Document};
pub use encode::{encode_document, encode_message};
pub use message::{CommandError, OpMsg};
