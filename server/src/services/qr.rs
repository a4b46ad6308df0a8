//! Ticket QR payloads.
//!
//! Issued tickets carry a signed token `base64url(claims).base64url(mac)`
//! where the MAC is HMAC-SHA256 over the encoded claims. The scanner side
//! also accepts what older or third-party printers put in the code: a JSON
//! object, a URL with the ticket in its query string, or a bare ticket id.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::utils::signing::{hmac_sha256, verify_hmac_sha256};
use crate::utils::{AppError, AppResult};

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    tid: Uuid,
    eid: Uuid,
}

#[derive(Clone)]
pub struct QrSigner {
    key: Vec<u8>,
}

impl QrSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    pub fn sign(&self, ticket_id: Uuid, event_id: Uuid) -> String {
        let claims = TokenClaims {
            tid: ticket_id,
            eid: event_id,
        };
        // Serializing two uuids cannot fail.
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        let encoded = URL_SAFE_NO_PAD.encode(json);
        let mac = hmac_sha256(&self.key, encoded.as_bytes());
        format!("{}.{}", encoded, URL_SAFE_NO_PAD.encode(mac))
    }

    /// Returns `(ticket_id, event_id)` from a token this signer issued.
    pub fn verify(&self, token: &str) -> AppResult<(Uuid, Uuid)> {
        let (encoded, mac) = token.split_once('.').ok_or(AppError::SignatureInvalid)?;
        let mac = URL_SAFE_NO_PAD
            .decode(mac)
            .map_err(|_| AppError::SignatureInvalid)?;

        if !verify_hmac_sha256(&self.key, encoded.as_bytes(), &mac) {
            return Err(AppError::SignatureInvalid);
        }

        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| AppError::SignatureInvalid)?;
        let claims: TokenClaims =
            serde_json::from_slice(&json).map_err(|_| AppError::SignatureInvalid)?;
        Ok((claims.tid, claims.eid))
    }
}

impl std::fmt::Debug for QrSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QrSigner").finish_non_exhaustive()
    }
}

/// A ticket reference recovered from a scanned code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedTicket {
    pub ticket_id: Uuid,
    /// Event named by the payload, if any.
    pub event_id: Option<Uuid>,
    /// Whether `ticket_id` and `event_id` came from a verified token.
    pub signed: bool,
}

impl ScannedTicket {
    fn unsigned(ticket_id: Uuid, event_id: Option<Uuid>) -> Self {
        Self {
            ticket_id,
            event_id,
            signed: false,
        }
    }

    fn from_token(signer: &QrSigner, token: &str) -> AppResult<Self> {
        let (ticket_id, event_id) = signer.verify(token)?;
        Ok(Self {
            ticket_id,
            event_id: Some(event_id),
            signed: true,
        })
    }

    /// Fails closed when the code names a different event than the gate.
    pub fn ensure_event(&self, event_id: Uuid) -> AppResult<()> {
        match self.event_id {
            Some(named) if named != event_id => Err(AppError::Forbidden(
                "Ticket belongs to a different event".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

const TOKEN_KEYS: [&str; 2] = ["token", "t"];
const TICKET_KEYS: [&str; 4] = ["ticketId", "ticket_id", "ticket", "id"];
const EVENT_KEYS: [&str; 3] = ["eventId", "event_id", "event"];

/// Recovers the ticket from any supported QR payload.
///
/// A payload that carries a signed token is only accepted if the token
/// verifies; the plain identifiers next to it are ignored.
pub fn resolve_payload(signer: &QrSigner, payload: &str) -> AppResult<ScannedTicket> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(AppError::ValidationError("Empty QR payload".to_string()));
    }

    if let Ok(ticket_id) = Uuid::parse_str(payload) {
        return Ok(ScannedTicket::unsigned(ticket_id, None));
    }

    if payload.starts_with('{') {
        return resolve_json(signer, payload);
    }

    if payload.starts_with("http://") || payload.starts_with("https://") {
        return resolve_url(signer, payload);
    }

    if payload.contains('.') {
        return ScannedTicket::from_token(signer, payload);
    }

    Err(AppError::ValidationError(
        "Unrecognised QR payload".to_string(),
    ))
}

fn resolve_json(signer: &QrSigner, payload: &str) -> AppResult<ScannedTicket> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|_| AppError::ValidationError("Malformed QR payload".to_string()))?;

    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .map(str::to_string)
    };

    if let Some(token) = field(&TOKEN_KEYS) {
        return ScannedTicket::from_token(signer, &token);
    }

    let ticket_id = parse_id(field(&TICKET_KEYS).as_deref(), "ticket")?;
    let event_id = match field(&EVENT_KEYS) {
        Some(raw) => Some(parse_id(Some(&raw), "event")?),
        None => None,
    };
    Ok(ScannedTicket::unsigned(ticket_id, event_id))
}

fn resolve_url(signer: &QrSigner, payload: &str) -> AppResult<ScannedTicket> {
    let url = url::Url::parse(payload)
        .map_err(|_| AppError::ValidationError("Malformed QR url".to_string()))?;
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

    let field = |keys: &[&str]| {
        keys.iter().find_map(|key| {
            pairs
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
        })
    };

    if let Some(token) = field(&TOKEN_KEYS) {
        return ScannedTicket::from_token(signer, &token);
    }

    let ticket = field(&TICKET_KEYS).or_else(|| {
        url.path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
    });
    let ticket_id = parse_id(ticket.as_deref(), "ticket")?;
    let event_id = match field(&EVENT_KEYS) {
        Some(raw) => Some(parse_id(Some(&raw), "event")?),
        None => None,
    };
    Ok(ScannedTicket::unsigned(ticket_id, event_id))
}

fn parse_id(raw: Option<&str>, what: &str) -> AppResult<Uuid> {
    raw.and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .ok_or_else(|| AppError::ValidationError(format!("QR payload has no valid {} id", what)))
}
