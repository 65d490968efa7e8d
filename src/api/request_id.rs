//! Request-ID is a UUID used to correlate the logs of one HTTP request

use hyper::HeaderMap;
use std::convert::TryFrom;
use thiserror::*;
use uuid::{fmt::Hyphenated, Uuid};

/// Request-ID for correlating logs together
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub struct RequestId(Uuid);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(c: Uuid) -> Self {
        RequestId(c)
    }
}

impl<'a> TryFrom<&'a str> for RequestId {
    type Error = InvalidRequestId;

    fn try_from(input: &'a str) -> Result<Self, Self::Error> {
        Uuid::parse_str(input)
            .map(RequestId)
            .map_err(|_| InvalidRequestId::InvalidString(input.to_string()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidRequestId {
    #[error("request-id not found")]
    NotFound,
    #[error("Invalid request-id string {0}")]
    InvalidString(String),
}

impl RequestId {
    pub const HEADER_NAME: &'static str = "x-request-id";

    pub fn generate() -> Self {
        RequestId(Uuid::new_v4())
    }

    /// Extract request-id from a set of HTTP headers
    pub fn from_header_map(h: &HeaderMap) -> Result<Self, InvalidRequestId> {
        h.get(Self::HEADER_NAME)
            .ok_or(InvalidRequestId::NotFound)
            .and_then(|x| {
                x.to_str()
                    .map_err(|err| InvalidRequestId::InvalidString(err.to_string()))
            })
            .and_then(RequestId::try_from)
    }

    /// Reuses the caller's id when it is a UUID, otherwise starts a new one.
    pub fn from_header_map_or_generate(h: &HeaderMap) -> Self {
        Self::from_header_map(h).unwrap_or_else(|_| Self::generate())
    }

    pub fn insert_into_header_map(&self, h: &mut HeaderMap) -> anyhow::Result<()> {
        h.insert(
            Self::HEADER_NAME,
            http::HeaderValue::from_str(
                self.as_hyphenated()
                    .encode_lower(&mut Uuid::encode_buffer()),
            )?,
        );
        Ok(())
    }

    pub fn as_hyphenated(&self) -> Hyphenated {
        self.0.hyphenated()
    }
}
