//! Datenmodelle fuer Klingel
//!
//! Diese Typen repraesentieren Datensaetze der Kollaborateure (Benutzerprofile,
//! Anrufprotokoll). Sie sind von den Protokoll-Typen getrennt und dienen als
//! reine Datenuebertragungsobjekte.

use chrono::{DateTime, Utc};
use klingel_core::types::{CallId, UserId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Benutzer
// ---------------------------------------------------------------------------

/// Oeffentliches Profil eines bekannten Benutzers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenutzerProfil {
    pub id: UserId,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl BenutzerProfil {
    pub fn neu(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            avatar_url: None,
        }
    }

    pub fn mit_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Anrufprotokoll
// ---------------------------------------------------------------------------

/// Art des Gespraechs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnrufTyp {
    Audio,
    Video,
}

impl AnrufTyp {
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// Abgeschlossenes Gespraech, wie es an das Anrufprotokoll uebergeben wird
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnrufDatensatz {
    pub call_id: CallId,
    pub anrufer: UserId,
    pub angerufener: UserId,
    pub beginn: DateTime<Utc>,
    pub ende: DateTime<Utc>,
    pub dauer_sek: u64,
    pub typ: AnrufTyp,
}

impl AnrufDatensatz {
    /// Gibt `true` zurueck wenn der Benutzer an diesem Gespraech beteiligt war
    pub fn betrifft(&self, user_id: &UserId) -> bool {
        &self.anrufer == user_id || &self.angerufener == user_id
    }
}
