//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use klingel_core::KlingelError;
use klingel_db::BenutzerProfil;
use klingel_observability::logging::{log_format_gueltig, log_level_gueltig};
use klingel_signaling::SignalingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Signaling-Einstellungen (Liveness, Pending-Queue, Verlauf)
    pub signaling: SignalingEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
    /// Bekannte Identitaeten mit ihrem Zugangs-Token
    pub benutzer: Vec<BenutzerEintrag>,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Klingel".into(),
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer HTTP und WebSocket
    pub bind_adresse: String,
    /// Port fuer HTTP und WebSocket
    pub port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 8765,
        }
    }
}

/// Signaling-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    /// Abstand der Liveness-Pruefungen in Sekunden
    pub liveness_intervall_sek: u64,
    /// Maximales Alter des letzten Lebenszeichens in Sekunden
    pub liveness_timeout_sek: u64,
    /// Maximale Pending-Signale pro Ziel (0 = unbegrenzt)
    pub pending_obergrenze: usize,
    /// Obergrenze fuer angefragte Verlaufseintraege
    pub verlauf_max_limit: usize,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        let standard = SignalingConfig::default();
        Self {
            liveness_intervall_sek: standard.liveness_intervall.as_secs(),
            liveness_timeout_sek: standard.liveness_timeout.as_secs(),
            pending_obergrenze: 0,
            verlauf_max_limit: standard.verlauf_max_limit,
        }
    }
}

impl SignalingEinstellungen {
    /// Laufzeit-Konfiguration fuer den Signaling-Zustand
    pub fn als_signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            liveness_intervall: Duration::from_secs(self.liveness_intervall_sek),
            liveness_timeout: Duration::from_secs(self.liveness_timeout_sek),
            pending_obergrenze: (self.pending_obergrenze > 0).then_some(self.pending_obergrenze),
            verlauf_max_limit: self.verlauf_max_limit,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Haengt `/metrics` und `/health` an den HTTP-Router
    pub aktiviert: bool,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self { aktiviert: true }
    }
}

/// Eine bekannte Identitaet (`[[benutzer]]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenutzerEintrag {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Zugangs-Token fuer `GET /ws?token=...`
    pub token: String,
}

impl BenutzerEintrag {
    pub fn profil(&self) -> BenutzerProfil {
        let profil = BenutzerProfil::neu(self.id.as_str(), self.username.as_str());
        match &self.avatar_url {
            Some(url) => profil.mit_avatar(url.as_str()),
            None => profil,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                config.validieren()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft Wertebereiche und Eindeutigkeit der Identitaeten
    pub fn validieren(&self) -> Result<(), KlingelError> {
        let s = &self.signaling;
        if s.liveness_intervall_sek == 0 {
            return Err(KlingelError::Konfiguration(
                "signaling.liveness_intervall_sek muss groesser 0 sein".into(),
            ));
        }
        if s.liveness_timeout_sek == 0 {
            return Err(KlingelError::Konfiguration(
                "signaling.liveness_timeout_sek muss groesser 0 sein".into(),
            ));
        }
        if s.verlauf_max_limit == 0 {
            return Err(KlingelError::Konfiguration(
                "signaling.verlauf_max_limit muss groesser 0 sein".into(),
            ));
        }
        if !log_format_gueltig(&self.logging.format) {
            return Err(KlingelError::Konfiguration(format!(
                "Unbekanntes Log-Format '{}'",
                self.logging.format
            )));
        }
        if !log_level_gueltig(&self.logging.level) {
            // EnvFilter-Direktiven wie "klingel_signaling=debug" sind erlaubt
            tracing::debug!(level = %self.logging.level, "Log-Level wird als Filter-Direktive verwendet");
        }

        let mut ids = HashSet::new();
        let mut tokens = HashSet::new();
        for b in &self.benutzer {
            if b.id.trim().is_empty() || b.token.trim().is_empty() {
                return Err(KlingelError::Konfiguration(format!(
                    "Benutzer '{}' braucht id und token",
                    b.username
                )));
            }
            if !ids.insert(b.id.as_str()) {
                return Err(KlingelError::Konfiguration(format!(
                    "Doppelte Benutzer-ID '{}'",
                    b.id
                )));
            }
            if !tokens.insert(b.token.as_str()) {
                return Err(KlingelError::Konfiguration(format!(
                    "Token von '{}' ist bereits vergeben",
                    b.id
                )));
            }
        }
        Ok(())
    }

    /// Gibt die vollstaendige Bind-Adresse fuer HTTP zurueck
    pub fn bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port)
    }
}
