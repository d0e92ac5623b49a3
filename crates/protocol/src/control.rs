//! Signaling-Protokoll (WebSocket, JSON-Textframes)
//!
//! Definiert alle Nachrichten die zwischen Client und Server ueber die
//! Signaling-Verbindung ausgetauscht werden.
//!
//! ## Design
//! - Jede Nachricht ist ein JSON-Objekt mit Diskriminator-Feld `type`
//! - Tagged Enums fuer typsichere Nachrichtentypen, getrennt nach Richtung
//! - Feldnamen folgen dem bestehenden Web-Client (camelCase, `avatar_url`)

use chrono::{DateTime, Utc};
use klingel_core::types::{CallId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer `error`-Antworten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InternalError,
    InvalidJson,
    MissingType,
    UnknownType,
    InvalidPayload,
}

// ---------------------------------------------------------------------------
// Status und Roster
// ---------------------------------------------------------------------------

/// Sichtbarer Status eines Teilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Verbunden und frei
    Available,
    /// Ruft gerade jemanden an (ausgehendes Klingeln)
    Calling,
    /// Wird gerade angerufen (eingehendes Klingeln)
    Ringing,
    /// Im Gespraech
    InCall,
    /// Bekannt, aber nicht verbunden (nur im Roster)
    Offline,
}

impl UserStatus {
    /// Gibt `true` zurueck wenn der Status einen Gespraechspartner erfordert
    pub fn ist_gespraechsgebunden(&self) -> bool {
        matches!(self, Self::Calling | Self::Ringing | Self::InCall)
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Available => "available",
            Self::Calling => "calling",
            Self::Ringing => "ringing",
            Self::InCall => "in_call",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Ein Eintrag in der Teilnehmerliste (`user_list`, `onlineUsers`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: UserId,
    pub username: String,
    pub avatar_url: Option<String>,
    pub avatar_color: String,
    pub online: bool,
    pub status: UserStatus,
}

/// Abgeschlossenes Gespraech im Anrufverlauf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecordInfo {
    pub call_id: CallId,
    pub caller_id: UserId,
    pub callee_id: UserId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub call_type: String,
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Alle Nachrichten die ein Client senden darf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Lebenszeichen
    Heartbeat,
    /// Teilnehmerliste anfordern
    GetUsers,
    /// Anruf an einen anderen Teilnehmer
    CallRequest {
        #[serde(rename = "targetId")]
        target_id: UserId,
    },
    /// Eingehenden Anruf annehmen
    CallAccept,
    /// Eingehenden Anruf ablehnen (oder ausgehenden zurueckziehen)
    CallDecline,
    /// Laufendes Gespraech beenden
    CallEnd,
    /// Opaker WebRTC-Aushandlungsinhalt (SDP, ICE) an einen Teilnehmer
    WebrtcSignal {
        #[serde(rename = "targetId")]
        target_id: UserId,
        signal: serde_json::Value,
    },
    /// Profil wurde extern geaendert, Roster neu verteilen
    ProfileUpdated,
    /// Eigenen Anrufverlauf anfordern
    GetCallHistory {
        #[serde(default)]
        limit: Option<u32>,
    },
}

/// Alle bekannten Werte des `type`-Felds eingehender Nachrichten
pub const CLIENT_NACHRICHTENTYPEN: &[&str] = &[
    "heartbeat",
    "get_users",
    "call_request",
    "call_accept",
    "call_decline",
    "call_end",
    "webrtc_signal",
    "profile_updated",
    "get_call_history",
];

/// Fehler beim Einlesen einer Client-Nachricht
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtokollFehler {
    #[error("Ungueltiges JSON: {0}")]
    UngueltigesJson(String),

    #[error("Feld 'type' fehlt")]
    FehlenderTyp,

    #[error("Unbekannter Nachrichtentyp: {0}")]
    UnbekannterTyp(String),

    #[error("Ungueltige Felder fuer '{typ}': {grund}")]
    UngueltigeFelder { typ: String, grund: String },
}

impl ProtokollFehler {
    /// Zugehoeriger Fehler-Code fuer die `error`-Antwort
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UngueltigesJson(_) => ErrorCode::InvalidJson,
            Self::FehlenderTyp => ErrorCode::MissingType,
            Self::UnbekannterTyp(_) => ErrorCode::UnknownType,
            Self::UngueltigeFelder { .. } => ErrorCode::InvalidPayload,
        }
    }
}

impl ClientMessage {
    /// Liest eine Client-Nachricht aus einem JSON-Textframe
    ///
    /// Unterscheidet zwischen kaputtem JSON, fehlendem Diskriminator,
    /// unbekanntem Typ und falschen Feldern eines bekannten Typs.
    pub fn parsen(text: &str) -> Result<Self, ProtokollFehler> {
        let wert: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ProtokollFehler::UngueltigesJson(e.to_string()))?;

        let typ = wert
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtokollFehler::FehlenderTyp)?
            .to_string();

        if !CLIENT_NACHRICHTENTYPEN.contains(&typ.as_str()) {
            return Err(ProtokollFehler::UnbekannterTyp(typ));
        }

        serde_json::from_value(wert).map_err(|e| ProtokollFehler::UngueltigeFelder {
            typ,
            grund: e.to_string(),
        })
    }

    /// Name des Nachrichtentyps fuer Logs
    pub fn typ_name(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::GetUsers => "get_users",
            Self::CallRequest { .. } => "call_request",
            Self::CallAccept => "call_accept",
            Self::CallDecline => "call_decline",
            Self::CallEnd => "call_end",
            Self::WebrtcSignal { .. } => "webrtc_signal",
            Self::ProfileUpdated => "profile_updated",
            Self::GetCallHistory { .. } => "get_call_history",
        }
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Alle Nachrichten die der Server sendet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Erfolgreiche Zulassung
    Registered {
        #[serde(rename = "userId")]
        user_id: UserId,
        username: String,
        avatar_url: Option<String>,
        token: String,
        #[serde(rename = "onlineUsers")]
        online_users: Vec<RosterEntry>,
    },
    /// Antwort auf `heartbeat`
    HeartbeatAck,
    /// Aktuelle Teilnehmerliste
    UserList { users: Vec<RosterEntry> },
    /// Eingehender Anruf
    IncomingCall {
        #[serde(rename = "callerId")]
        caller_id: UserId,
        #[serde(rename = "callerName")]
        caller_name: String,
        #[serde(rename = "callerAvatar")]
        caller_avatar: String,
    },
    /// Anruf konnte nicht aufgebaut werden
    CallError { message: String },
    /// Gegenseite hat angenommen
    CallAccepted {
        #[serde(rename = "calleeId")]
        callee_id: UserId,
        #[serde(rename = "calleeName")]
        callee_name: String,
    },
    /// Gegenseite hat abgelehnt
    CallDeclined { message: String },
    /// Gegenseite hat aufgelegt
    CallEnded { message: String },
    /// Gespraechspartner ist nicht mehr verbunden
    PeerDisconnected {
        #[serde(rename = "userId")]
        user_id: UserId,
        message: String,
    },
    /// Weitergeleiteter WebRTC-Aushandlungsinhalt
    WebrtcSignal {
        signal: serde_json::Value,
        #[serde(rename = "senderId")]
        sender_id: UserId,
    },
    /// Anrufverlauf des Teilnehmers
    CallHistory { calls: Vec<CallRecordInfo> },
    /// Protokollfehler
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    /// Erstellt eine Fehler-Antwort
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Erstellt eine `call_error`-Antwort
    pub fn call_error(message: impl Into<String>) -> Self {
        Self::CallError {
            message: message.into(),
        }
    }

    /// Name des Nachrichtentyps fuer Logs
    pub fn typ_name(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "registered",
            Self::HeartbeatAck => "heartbeat_ack",
            Self::UserList { .. } => "user_list",
            Self::IncomingCall { .. } => "incoming_call",
            Self::CallError { .. } => "call_error",
            Self::CallAccepted { .. } => "call_accepted",
            Self::CallDeclined { .. } => "call_declined",
            Self::CallEnded { .. } => "call_ended",
            Self::PeerDisconnected { .. } => "peer_disconnected",
            Self::WebrtcSignal { .. } => "webrtc_signal",
            Self::CallHistory { .. } => "call_history",
            Self::Error { .. } => "error",
        }
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht aus JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl From<ProtokollFehler> for ServerMessage {
    fn from(fehler: ProtokollFehler) -> Self {
        Self::error(fehler.code(), fehler.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
