//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (ueberschreibt die Konfigurationsdatei):
//! - `KLINGEL_LOG_LEVEL`: Log-Level oder EnvFilter-Direktive, Standard: info
//! - `KLINGEL_LOG_FORMAT`: Format (text/json), Standard: text

use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "KLINGEL_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "KLINGEL_LOG_FORMAT";

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Initialisiert das Logging-System.
///
/// Umgebungsvariablen haben Vorrang vor den uebergebenen Werten.
/// Ein bereits installierter globaler Subscriber wird beibehalten.
pub fn logging_initialisieren(level: &str, format: &str) {
    let level = level_waehlen(std::env::var(ENV_LOG_LEVEL).ok(), level);
    let format = format_waehlen(std::env::var(ENV_LOG_FORMAT).ok(), format);

    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let ergebnis = match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    if ergebnis.is_err() {
        tracing::debug!("Logging war bereits initialisiert");
    }
}

/// Waehlt den effektiven Log-Level: Umgebung vor Konfiguration
pub fn level_waehlen(aus_env: Option<String>, konfiguriert: &str) -> String {
    match aus_env {
        Some(wert) if !wert.trim().is_empty() => wert,
        _ => konfiguriert.to_string(),
    }
}

/// Waehlt das effektive Log-Format, unbekannte Werte ergeben `text`
pub fn format_waehlen(aus_env: Option<String>, konfiguriert: &str) -> LogFormat {
    let wert = aus_env.unwrap_or_else(|| konfiguriert.to_string());
    match wert.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
