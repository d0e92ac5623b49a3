//! klingel-db – Persistenz-Schnittstellen
//!
//! Dieses Crate stellt das Repository-Pattern fuer die externen
//! Kollaborateure des Signaling-Kerns bereit (Profile, Roster-Quelle,
//! Anrufprotokoll) sowie eine In-Memory-Implementierung aller Traits.

pub mod error;
pub mod memory;
pub mod models;
pub mod repository;

pub use error::DbError;
pub use memory::MemoryDb;
pub use models::{AnrufDatensatz, AnrufTyp, BenutzerProfil};
pub use repository::{
    CallLogRepository, DbResult, ProfileRepository, RosterRepository, VERLAUF_STANDARD_LIMIT,
};
