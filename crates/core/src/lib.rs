//! klingel-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Identifikationstypen und den zentralen Fehler-Enum
//! bereit, die von allen anderen Klingel-Crates gemeinsam genutzt werden.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::KlingelError;
pub use types::{CallId, UserId};
