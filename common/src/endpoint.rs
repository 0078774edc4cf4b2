//! Request handling for `POST /ac`, shared by the ESP32 and host listeners.
//!
//! Listeners only adapt their server's request and response types; every
//! decision about a request is made here.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{info, warn};
use subtle::ConstantTimeEq;

use crate::command::{CommandSlot, FieldError, PendingCommand, Translator};

pub const AC_ROUTE: &str = "/ac";
pub const MAX_BODY_BYTES: usize = 1024;
pub const AUTH_REALM: &str = "ac-remote";
pub const FIELD_ERROR_HEADER: &str = "X-Field-Error";

#[derive(Debug, Clone, Copy)]
pub struct IncomingRequest<'a> {
    pub method: &'a str,
    pub authorization: Option<&'a str>,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointOutcome {
    Accepted(PendingCommand),
    Unauthorized,
    MethodNotAllowed,
    BodyTooLarge { len: usize },
    MalformedBody,
    MissingField(FieldError),
}

impl EndpointOutcome {
    pub fn status(&self) -> u16 {
        match self {
            Self::Accepted(_) => 200,
            Self::MissingField(_) => 400,
            Self::Unauthorized => 401,
            Self::MethodNotAllowed => 405,
            Self::BodyTooLarge { .. } | Self::MalformedBody => 500,
        }
    }

    pub fn body(&self) -> &'static str {
        match self {
            Self::Accepted(_) => "OK",
            Self::MissingField(_) => "Missing field",
            Self::Unauthorized => "Unauthorized",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::BodyTooLarge { .. } => "Body too large",
            Self::MalformedBody => "Invalid JSON",
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Accepted(_) => "OK",
            Self::MissingField(_) => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::BodyTooLarge { .. } | Self::MalformedBody => "Internal Server Error",
        }
    }

    /// Extra response headers besides the content type.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Unauthorized => vec![("WWW-Authenticate", BasicCredentials::challenge())],
            Self::MethodNotAllowed => vec![("Allow", "POST".to_string())],
            Self::MissingField(err) => vec![(FIELD_ERROR_HEADER, err.code().to_string())],
            _ => Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct BasicCredentials {
    username: String,
    password: String,
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn challenge() -> String {
        format!("Basic realm=\"{AUTH_REALM}\"")
    }

    /// `Authorization` header value a client would send for these credentials.
    pub fn authorization_header(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }

    pub fn verify(&self, authorization: Option<&str>) -> bool {
        let Some((scheme, token)) = authorization.and_then(|value| value.trim().split_once(' '))
        else {
            return false;
        };
        if !scheme.eq_ignore_ascii_case("basic") {
            return false;
        }
        let Ok(decoded) = STANDARD.decode(token.trim()) else {
            return false;
        };
        let Some(split) = decoded.iter().position(|byte| *byte == b':') else {
            return false;
        };

        let user_ok = decoded[..split].ct_eq(self.username.as_bytes());
        let pass_ok = decoded[split + 1..].ct_eq(self.password.as_bytes());
        bool::from(user_ok & pass_ok)
    }
}

/// Runs the checks in order: credentials, method, body, fields. Only an
/// accepted request reaches the slot.
pub fn handle_ac_request(
    credentials: &BasicCredentials,
    translator: &Translator,
    slot: &CommandSlot,
    request: &IncomingRequest<'_>,
) -> EndpointOutcome {
    if !credentials.verify(request.authorization) {
        warn!("rejected {} {AC_ROUTE}: bad credentials", request.method);
        return EndpointOutcome::Unauthorized;
    }

    if !request.method.eq_ignore_ascii_case("POST") {
        warn!("rejected {} {AC_ROUTE}: method not allowed", request.method);
        return EndpointOutcome::MethodNotAllowed;
    }

    if request.body.len() > MAX_BODY_BYTES {
        warn!("rejected body of {} bytes", request.body.len());
        return EndpointOutcome::BodyTooLarge {
            len: request.body.len(),
        };
    }

    let payload = match serde_json::from_slice::<serde_json::Value>(request.body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!("rejected body: {err}");
            return EndpointOutcome::MalformedBody;
        }
    };

    match translator.translate(&payload) {
        Ok(command) => {
            if let Some(replaced) = slot.put(command) {
                info!("replaced unsent command {replaced:?}");
            }
            info!("accepted command {command:?}");
            EndpointOutcome::Accepted(command)
        }
        Err(err) => {
            warn!("rejected command: {err} (code {})", err.code());
            EndpointOutcome::MissingField(err)
        }
    }
}

/// Everything a listener needs to answer `/ac`. Cheap to clone into handlers.
#[derive(Debug, Clone)]
pub struct AcEndpoint {
    credentials: BasicCredentials,
    translator: Translator,
    slot: CommandSlot,
}

impl AcEndpoint {
    pub fn new(credentials: BasicCredentials, translator: Translator, slot: CommandSlot) -> Self {
        Self {
            credentials,
            translator,
            slot,
        }
    }

    pub fn slot(&self) -> &CommandSlot {
        &self.slot
    }

    pub fn handle(&self, request: &IncomingRequest<'_>) -> EndpointOutcome {
        handle_ac_request(&self.credentials, &self.translator, &self.slot, request)
    }
}
