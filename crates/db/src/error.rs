//! Fehlertypen fuer das Datenbank-Crate

use thiserror::Error;

/// Datenbank-Fehlertypen
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Eindeutigkeitsverletzung: {0}")]
    Eindeutigkeit(String),

    #[error("Speicher nicht verfuegbar: {0}")]
    NichtVerfuegbar(String),
}

impl From<DbError> for klingel_core::KlingelError {
    fn from(e: DbError) -> Self {
        Self::Persistenz(e.to_string())
    }
}
