//! DTOs for interacting with the Entra ID token endpoint

use std::fmt;

use assertion_clock::DurationSecs;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::{BearerToken, ClientAssertionRef, ClientIdRef};

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// The client capability announcing support for continuous access evaluation
const CAE_CLIENT_CAPABILITY: &str = "CP1";

/// The form body of a client credentials grant authenticated with an assertion
#[derive(Debug)]
pub(super) struct AssertionGrant<'a> {
    pub client_id: &'a ClientIdRef,
    pub assertion: &'a ClientAssertionRef,
    pub scope: String,
    pub claims: Option<String>,
}

impl Serialize for AssertionGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("AssertionGrant", 6)?;
        ser.serialize_field("grant_type", "client_credentials")?;
        ser.serialize_field("client_id", self.client_id)?;
        ser.serialize_field("client_assertion", self.assertion)?;
        ser.serialize_field("client_assertion_type", CLIENT_ASSERTION_TYPE)?;
        ser.serialize_field("scope", &self.scope)?;
        if let Some(claims) = &self.claims {
            ser.serialize_field("claims", claims)?;
        } else {
            ser.skip_field("claims")?;
        }
        ser.end()
    }
}

/// Combines a claims challenge with the client capabilities for the request
///
/// Returns the claims unchanged when continuous access evaluation is not
/// requested.
pub(super) fn merge_claims(
    claims: Option<&str>,
    enable_cae: bool,
) -> Result<Option<String>, serde_json::Error> {
    if !enable_cae {
        return Ok(claims.map(str::to_owned));
    }

    let mut merged = match claims.map(str::trim) {
        Some(claims) if !claims.is_empty() => serde_json::from_str(claims)?,
        _ => json!({}),
    };

    if let Value::Object(root) = &mut merged {
        let access_token = root
            .entry("access_token")
            .or_insert_with(|| json!({}));
        if let Value::Object(access_token) = access_token {
            access_token.insert(
                "xms_cc".to_owned(),
                json!({ "values": [CAE_CLIENT_CAPABILITY] }),
            );
        }
    }

    serde_json::to_string(&merged).map(Some)
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: BearerToken,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(deserialize_with = "seconds")]
    pub expires_in: DurationSecs,
    #[serde(default, deserialize_with = "optional_seconds")]
    pub refresh_in: Option<DurationSecs>,
}

/// Some authorities report durations as strings rather than numbers
#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(u64),
    Text(String),
}

impl Seconds {
    fn into_duration<E: de::Error>(self) -> Result<DurationSecs, E> {
        match self {
            Seconds::Number(n) => Ok(DurationSecs(n)),
            Seconds::Text(s) => s.trim().parse().map(DurationSecs).map_err(E::custom),
        }
    }
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DurationSecs, D::Error> {
    Seconds::deserialize(deserializer)?.into_duration()
}

fn optional_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DurationSecs>, D::Error> {
    Option::<Seconds>::deserialize(deserializer)?
        .map(Seconds::into_duration)
        .transpose()
}

/// The error body returned by the authority when it rejects a request
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    /// The OAuth2 error code, such as `invalid_client`
    #[serde(default)]
    pub error: String,
    /// A human-readable description of the error
    #[serde(default)]
    pub error_description: Option<String>,
    /// Numeric error codes specific to the authority
    #[serde(default)]
    pub error_codes: Vec<u64>,
    /// A correlation ID useful when contacting the authority's support
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// A trace ID for the failed request
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl ErrorBody {
    /// Parses an error body, keeping the raw text as the description when the
    /// body is not a JSON error object
    pub fn from_bytes(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_else(|_| Self {
            error_description: Some(String::from_utf8_lossy(body).into_owned()),
            ..Self::default()
        })
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.error.is_empty(), &self.error_description) {
            (false, Some(description)) => write!(f, "{}: {}", self.error, description),
            (false, None) => f.write_str(&self.error),
            (true, Some(description)) => f.write_str(description),
            (true, None) => f.write_str("no error details"),
        }
    }
}
