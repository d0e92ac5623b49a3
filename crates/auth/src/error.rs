//! Fehlertypen fuer den Auth-Kollaborateur

use thiserror::Error;

/// Alle moeglichen Fehler bei der Token-Aufloesung
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token unbekannt")]
    TokenUnbekannt,

    // --- Token-Registrierung ---
    #[error("Token darf nicht leer sein")]
    TokenLeer,

    #[error("Token ist bereits einem anderen Teilnehmer zugeordnet")]
    TokenVergeben,
}

/// Result-Alias fuer den Auth-Kollaborateur
pub type AuthResult<T> = Result<T, AuthError>;
