//! klingel-auth – Token-Aufloesung
//!
//! Dieses Crate implementiert:
//! - `TokenResolver`: Schnittstelle Token -> Teilnehmer-ID fuer den Signaling-Kern
//! - `SessionStore`: In-Memory-Zuordnung vorkonfigurierter Tokens

pub mod error;
pub mod resolver;
pub mod session;

// Bequeme Re-Exporte
pub use error::{AuthError, AuthResult};
pub use resolver::TokenResolver;
pub use session::SessionStore;
