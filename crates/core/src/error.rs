//! Fehlertypen fuer Klingel
//!
//! Zentraler Fehler-Enum fuer crate-uebergreifende Fehlerzustaende beim
//! Aufbau des Servers. Untermodule definieren eigene Fehler und
//! konvertieren per `From`.

use thiserror::Error;

/// Alle crate-uebergreifenden Fehler im Klingel-System
#[derive(Debug, Error)]
pub enum KlingelError {
    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Persistenz ---
    #[error("Persistenzfehler: {0}")]
    Persistenz(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = KlingelError::Konfiguration("port fehlt".into());
        assert_eq!(e.to_string(), "Konfigurationsfehler: port fehlt");
        let e = KlingelError::Persistenz("Platte voll".into());
        assert_eq!(e.to_string(), "Persistenzfehler: Platte voll");
    }
}
