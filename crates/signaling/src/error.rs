//! Fehlertypen fuer den Signaling-Service

use klingel_auth::AuthError;
use klingel_core::types::UserId;
use klingel_db::DbError;
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Kein Session-Token in der Anfrage
    #[error("Session-Token fehlt")]
    TokenFehlt,

    /// Token konnte nicht aufgeloest werden
    #[error("Authentifizierungsfehler: {0}")]
    Auth(#[from] AuthError),

    /// Token gueltig, aber kein Profil zur Teilnehmer-ID
    #[error("Kein Profil fuer Teilnehmer {0}")]
    ProfilFehlt(UserId),

    /// Fehler eines Persistenz-Kollaborateurs
    #[error("Persistenzfehler: {0}")]
    Db(#[from] DbError),
}

impl SignalingError {
    /// Gibt true zurueck wenn der Fehler eine abgelehnte Zulassung bedeutet
    pub fn ist_zulassungsfehler(&self) -> bool {
        matches!(self, Self::TokenFehlt | Self::Auth(_) | Self::ProfilFehlt(_))
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zulassungsfehler_erkannt() {
        assert!(SignalingError::TokenFehlt.ist_zulassungsfehler());
        assert!(SignalingError::Auth(AuthError::TokenUnbekannt).ist_zulassungsfehler());
        assert!(SignalingError::ProfilFehlt(UserId::from("x")).ist_zulassungsfehler());
        assert!(!SignalingError::Db(DbError::NichtVerfuegbar("weg".into())).ist_zulassungsfehler());
    }
}
