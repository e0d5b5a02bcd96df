use std::collections::BTreeMap;
use std::fmt;
use std::io;

use serde::Deserialize;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::response::ProtocolError;

/// Message name the helper dispatches on for authenticate-only requests.
const AUTH_ONLY_MESSAGE: &str = "AuthOnly";

/// Message name the helper dispatches on for authenticate-and-run requests.
const AUTH_AND_RUN_MESSAGE: &str = "AuthAndRun";

/// A user's password. The backing buffer is wiped when dropped and the value
/// never shows up in `Debug` output.
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq::constant_time_eq(self.0.as_bytes(), other.0.as_bytes())
    }
}

impl Eq for Secret {}

/// One request frame sent from the broker to the helper.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthRequest {
    /// Authenticate, then have the helper exec the target program as the user.
    Run {
        username: String,
        secret: Secret,
        arguments: Vec<String>,
        environment: BTreeMap<String, String>,
    },
    /// Authenticate only and report the user's profile directory.
    Probe { username: String, secret: Secret },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequestRef<'a> {
    name: &'static str,
    username: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    name: String,
    username: String,
    password: String,
    #[serde(default)]
    arguments: Option<Vec<String>>,
    #[serde(default)]
    environment: Option<Vec<String>>,
}

impl AuthRequest {
    pub fn username(&self) -> &str {
        match self {
            AuthRequest::Run { username, .. } | AuthRequest::Probe { username, .. } => username,
        }
    }

    /// The `name` field written on the wire.
    pub fn message_name(&self) -> &'static str {
        match self {
            AuthRequest::Run { .. } => AUTH_AND_RUN_MESSAGE,
            AuthRequest::Probe { .. } => AUTH_ONLY_MESSAGE,
        }
    }

    /// Serialize to the JSON payload of a request frame. The returned buffer
    /// holds the password and is wiped on drop.
    pub fn encode(&self) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
        let wire = match self {
            AuthRequest::Run {
                username,
                secret,
                arguments,
                environment,
            } => WireRequestRef {
                name: AUTH_AND_RUN_MESSAGE,
                username,
                password: secret.expose(),
                arguments: Some(arguments.as_slice()),
                environment: Some(
                    environment
                        .iter()
                        .map(|(key, value)| format!("{key}={value}"))
                        .collect(),
                ),
            },
            AuthRequest::Probe { username, secret } => WireRequestRef {
                name: AUTH_ONLY_MESSAGE,
                username,
                password: secret.expose(),
                arguments: None,
                environment: None,
            },
        };

        // The buffer must never grow: a reallocation leaves the old, unwiped
        // allocation behind. Measure first, then serialize into an exact fit.
        let mut counter = ByteCounter::default();
        serde_json::to_writer(&mut counter, &wire).map_err(ProtocolError::Json)?;
        let mut buf = Zeroizing::new(Vec::with_capacity(counter.len));
        serde_json::to_writer(&mut *buf, &wire).map_err(ProtocolError::Json)?;
        Ok(buf)
    }

    /// Parse a request frame payload, as the helper does.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let WireRequest {
            name,
            username,
            password,
            arguments,
            environment,
        } = serde_json::from_slice(payload).map_err(ProtocolError::Json)?;
        let secret = Secret::new(password);

        match name.as_str() {
            AUTH_ONLY_MESSAGE => Ok(AuthRequest::Probe { username, secret }),
            AUTH_AND_RUN_MESSAGE => {
                let arguments = arguments.ok_or(ProtocolError::MissingField("arguments"))?;
                let environment = environment
                    .ok_or(ProtocolError::MissingField("environment"))?
                    .into_iter()
                    .map(parse_environment_entry)
                    .collect::<Result<BTreeMap<_, _>, _>>()?;
                Ok(AuthRequest::Run {
                    username,
                    secret,
                    arguments,
                    environment,
                })
            }
            _ => Err(ProtocolError::UnknownMessage(name)),
        }
    }
}

/// Discards everything written to it, keeping only the byte count.
#[derive(Default)]
struct ByteCounter {
    len: usize,
}

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.len += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Splits `KEY=VALUE` at the first `=`; the value may contain more of them.
fn parse_environment_entry(entry: String) -> Result<(String, String), ProtocolError> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(ProtocolError::MalformedEnvironment(entry)),
    }
}
