//! Repository-Trait-Definitionen
//!
//! Das Repository-Pattern entkoppelt den Signaling-Kern von der konkreten
//! Persistenz. Der Kern kennt nur diese drei Schnittstellen:
//!
//! - `ProfileRepository` – Profil eines Teilnehmers nachschlagen
//! - `RosterRepository`  – alle bekannten Identitaeten (auch offline)
//! - `CallLogRepository` – abgeschlossene Gespraechsdatensaetze ablegen

use async_trait::async_trait;
use klingel_core::types::UserId;

use crate::error::DbError;
use crate::models::{AnrufDatensatz, BenutzerProfil};

/// Result-Alias fuer alle Repository-Operationen
pub type DbResult<T> = Result<T, DbError>;

/// Standard-Limit fuer den Anrufverlauf
pub const VERLAUF_STANDARD_LIMIT: usize = 50;

/// Profil-Lookup nach Teilnehmer-ID
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Laedt das Profil eines Benutzers
    async fn profil_laden(&self, id: &UserId) -> DbResult<Option<BenutzerProfil>>;
}

/// Quelle aller bekannten Identitaeten fuer den Roster
#[async_trait]
pub trait RosterRepository: Send + Sync {
    /// Gibt alle bekannten Benutzer zurueck (verbunden oder nicht)
    async fn alle_benutzer(&self) -> DbResult<Vec<BenutzerProfil>>;
}

/// Anrufprotokoll
#[async_trait]
pub trait CallLogRepository: Send + Sync {
    /// Legt einen abgeschlossenen Gespraechsdatensatz ab
    async fn speichern(&self, datensatz: AnrufDatensatz) -> DbResult<()>;

    /// Anrufverlauf eines Benutzers, neueste zuerst
    async fn verlauf(&self, user_id: &UserId, limit: usize) -> DbResult<Vec<AnrufDatensatz>>;
}
