//! Protocol message types

use super::document::Document;

/// An OP_MSG frame with a single body section.
///
/// Used in both directions: requests carry a fresh `request_id`, replies echo it in
/// `response_to`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpMsg {
    /// Sender-chosen identifier
    pub request_id: i32,
    /// `request_id` of the message this one answers (0 for requests)
    pub response_to: i32,
    /// OP_MSG flag bits
    pub flags: u32,
    /// Body document
    pub body: Document,
}

impl OpMsg {
    /// Build a request frame
    pub fn request(request_id: i32, body: Document) -> Self {
        Self {
            request_id,
            response_to: 0,
            flags: 0,
            body,
        }
    }

    /// Build a reply frame answering `request_id`
    pub fn reply(request_id: i32, response_to: i32, body: Document) -> Self {
        Self {
            request_id,
            response_to,
            flags: 0,
            body,
        }
    }
}

/// Failure reported by the server in a command reply (`ok: 0`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    /// Numeric server error code (0 when absent)
    pub code: i32,
    /// Symbolic code name
    pub code_name: Option<String>,
    /// Human-readable message
    pub message: String,
}

impl CommandError {
    /// Extract the failure from a reply body.
    ///
    /// Returns `None` when the reply reports success. A `writeConcernError` on an
    /// otherwise successful reply counts as a failure.
    pub fn from_reply(reply: &Document) -> Option<Self> {
        let ok = reply.get_i64("ok").unwrap_or(0);
        if ok != 1 {
            return Some(Self::from_fields(reply));
        }
        reply.get_document("writeConcernError").map(Self::from_fields)
    }

    fn from_fields(doc: &Document) -> Self {
        Self {
            code: doc
                .get_i64("code")
                .and_then(|c| i32::try_from(c).ok())
                .unwrap_or(0),
            code_name: doc.get_str("codeName").map(str::to_string),
            message: doc
                .get_str("errmsg")
                .unwrap_or("unknown server error")
                .to_string(),
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        match &self.code_name {
            Some(name) => write!(f, " ({} {})", self.code, name),
            None => write!(f, " ({})", self.code),
        }
    }
}
