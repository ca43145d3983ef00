//! Error payloads returned by the web service.
//!
//! The server answers failed calls with HTTP 200 and a json object carrying
//! an `errorcode`. Known codes map to a [`ServiceErrorKind`]; the rest are
//! [`ServiceErrorKind::Other`].

use std::fmt;

use serde_json::Value;

use crate::decode::Decoder;
use crate::schema::{record, Kind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    InvalidToken,
    AccessException,
    NoPermissions,
    InvalidResponse,
    InvalidRecord,
    InvalidLogin,
    Other,
}

const ERROR_CODES: &[(&str, ServiceErrorKind)] = &[
    ("invalidtoken", ServiceErrorKind::InvalidToken),
    ("accessexception", ServiceErrorKind::AccessException),
    ("nopermissions", ServiceErrorKind::NoPermissions),
    ("invalidresponse", ServiceErrorKind::InvalidResponse),
    ("invalidrecord", ServiceErrorKind::InvalidRecord),
    ("invalidlogin", ServiceErrorKind::InvalidLogin),
];

impl ServiceErrorKind {
    pub fn from_code(code: &str) -> Self {
        ERROR_CODES
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, kind)| *kind)
            .unwrap_or(ServiceErrorKind::Other)
    }
}

record! {
    /// Body of a failed call. Web-service calls set `exception` and
    /// `message`, the token endpoint sets `error`.
    pub struct ErrorPayload: ERROR_PAYLOAD = "error" {
        required errorcode: String => Kind::Str,
        optional exception: Option<String> => Kind::Str,
        optional message: Option<String> => Kind::Str,
        optional error: Option<String> => Kind::Str,
        optional debuginfo: Option<String> => Kind::Str,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub code: String,
    pub message: String,
    pub debuginfo: Option<String>,
}

impl ServiceError {
    /// Recognizes an error payload. Anything that is not an object with an
    /// `errorcode` plus `exception` or `error` is a regular response.
    pub fn from_payload(raw: &Value) -> Option<Self> {
        let object = raw.as_object()?;
        if !(object.contains_key("errorcode")
            && (object.contains_key("exception") || object.contains_key("error")))
        {
            return None;
        }
        let payload: ErrorPayload = Decoder::new().shape_check(false).decode_one(raw).ok()?;
        let message = payload
            .message
            .or(payload.error)
            .or(payload.exception)
            .unwrap_or_default();
        Some(Self {
            kind: ServiceErrorKind::from_code(&payload.errorcode),
            code: payload.errorcode,
            message,
            debuginfo: payload.debuginfo,
        })
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ServiceErrorKind::InvalidToken => {
                write!(f, "the stored token was rejected ({}), run `mdt auth` again", self.message)
            }
            ServiceErrorKind::InvalidLogin => {
                write!(f, "login failed: {}", self.message)
            }
            ServiceErrorKind::AccessException | ServiceErrorKind::NoPermissions => {
                write!(f, "access denied: {}", self.message)
            }
            ServiceErrorKind::InvalidResponse => {
                write!(f, "the server produced an invalid response: {}", self.message)?;
                if let Some(debuginfo) = &self.debuginfo {
                    write!(f, " ({})", debuginfo.trim())?;
                }
                Ok(())
            }
            ServiceErrorKind::InvalidRecord => {
                write!(f, "record not found on the server: {}", self.message)
            }
            ServiceErrorKind::Other => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for ServiceError {}
