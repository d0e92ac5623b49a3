//! Token-Aufloesung – Schnittstelle zum Auth-Kollaborateur
//!
//! Der Signaling-Kern kennt Authentifizierung nur als "ein opaker
//! Session-Token loest sich zu einer Teilnehmer-ID auf".

use async_trait::async_trait;
use klingel_core::types::UserId;

use crate::error::AuthResult;

/// Loest einen Session-Token zu einer Teilnehmer-ID auf
#[async_trait]
pub trait TokenResolver: Send + Sync {
    /// Gibt die Teilnehmer-ID zurueck oder einen Fehler bei unbekanntem/abgelaufenem Token
    async fn aufloesen(&self, token: &str) -> AuthResult<UserId>;
}
