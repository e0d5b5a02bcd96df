use serde_json::Value;

use crate::frame::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed request payload: {0}")]
    Json(#[source] serde_json::Error),
    #[error("unknown request message {0:?}")]
    UnknownMessage(String),
    #[error("request is missing `{0}`")]
    MissingField(&'static str),
    #[error("environment entry {0:?} is not KEY=VALUE")]
    MalformedEnvironment(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("invalid helper response: {0}")]
    InvalidResponse(String),
    #[error("helper could not parse the request: {0}")]
    RequestRejected(String),
}

/// First element of a reply array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyTag {
    PamInfo,
    PamError,
    UnixError,
    JsonError,
    RtvsResult,
    RtvsError,
}

impl ReplyTag {
    pub const ALL: [ReplyTag; 6] = [
        ReplyTag::PamInfo,
        ReplyTag::PamError,
        ReplyTag::UnixError,
        ReplyTag::JsonError,
        ReplyTag::RtvsResult,
        ReplyTag::RtvsError,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ReplyTag::PamInfo => "pam-info",
            ReplyTag::PamError => "pam-error",
            ReplyTag::UnixError => "unix-error",
            ReplyTag::JsonError => "json-error",
            ReplyTag::RtvsResult => "rtvs-result",
            ReplyTag::RtvsError => "rtvs-error",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == tag)
    }
}

/// A decoded reply frame. The tag set is closed: anything the broker does not
/// recognize becomes [`AuthResponse::Invalid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResponse {
    PamInfo(String),
    PamError(String),
    SysError(String),
    JsonError(String),
    /// Authentication succeeded; the payload is the user's profile directory,
    /// which may be empty when the profile was never provisioned.
    Result(String),
    /// The helper failed for a reason it names with a message-catalogue key.
    ExecError(String),
    Invalid(String),
}

impl AuthResponse {
    /// Decode a reply frame payload. Never fails: malformed input is `Invalid`.
    pub fn decode(payload: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(payload) {
            Ok(value) => Self::from_value(value),
            Err(err) => AuthResponse::Invalid(format!("reply is not valid JSON: {err}")),
        }
    }

    pub fn from_value(value: Value) -> Self {
        let Value::Array(items) = value else {
            return AuthResponse::Invalid("reply is not an array".to_string());
        };
        if items.len() < 2 {
            return AuthResponse::Invalid(format!(
                "reply has {} element(s), expected 2",
                items.len()
            ));
        }

        let Some(tag) = items[0].as_str() else {
            return AuthResponse::Invalid("reply tag is not a string".to_string());
        };
        let Some(tag) = ReplyTag::parse(tag) else {
            return AuthResponse::Invalid(format!("unknown reply tag {tag:?}"));
        };
        let Some(payload) = payload_text(&items[1]) else {
            return AuthResponse::Invalid(format!(
                "payload for {} is not a scalar",
                tag.as_str()
            ));
        };

        match tag {
            ReplyTag::PamInfo => AuthResponse::PamInfo(payload),
            ReplyTag::PamError => AuthResponse::PamError(payload),
            ReplyTag::UnixError => AuthResponse::SysError(payload),
            ReplyTag::JsonError => AuthResponse::JsonError(payload),
            ReplyTag::RtvsResult => AuthResponse::Result(payload),
            ReplyTag::RtvsError => AuthResponse::ExecError(payload),
        }
    }

    pub fn tag(&self) -> Option<ReplyTag> {
        match self {
            AuthResponse::PamInfo(_) => Some(ReplyTag::PamInfo),
            AuthResponse::PamError(_) => Some(ReplyTag::PamError),
            AuthResponse::SysError(_) => Some(ReplyTag::UnixError),
            AuthResponse::JsonError(_) => Some(ReplyTag::JsonError),
            AuthResponse::Result(_) => Some(ReplyTag::RtvsResult),
            AuthResponse::ExecError(_) => Some(ReplyTag::RtvsError),
            AuthResponse::Invalid(_) => None,
        }
    }
}

// The helper reports some errors as bare numbers (e.g. `["rtvs-error", 202]`).
fn payload_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Encode a `[tag, payload]` reply as the helper writes it.
pub fn encode_reply(tag: ReplyTag, payload: &str) -> Vec<u8> {
    Value::Array(vec![
        Value::String(tag.as_str().to_string()),
        Value::String(payload.to_string()),
    ])
    .to_string()
    .into_bytes()
}
