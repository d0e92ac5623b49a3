//! Token-Store fuer Klingel
//!
//! Ordnet extern vergebene Session-Tokens einer Teilnehmer-ID zu. Die
//! Tokens kommen aus der Server-Konfiguration; Ausgabe und Ablauf von
//! Tokens liegen beim Auth-Dienst ausserhalb von Klingel.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use klingel_core::types::UserId;
use tokio::sync::RwLock;

use crate::error::{AuthError, AuthResult};
use crate::resolver::TokenResolver;

/// In-Memory Token-Store
#[derive(Debug, Default)]
pub struct SessionStore {
    /// token -> Teilnehmer
    tokens: RwLock<HashMap<String, UserId>>,
}

impl SessionStore {
    /// Erstellt einen neuen leeren Store
    pub fn neu() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registriert einen extern vergebenen Token
    ///
    /// Derselbe Token fuer denselben Teilnehmer ist idempotent, fuer einen
    /// anderen Teilnehmer ein Fehler.
    pub async fn token_registrieren(&self, token: &str, user_id: UserId) -> AuthResult<()> {
        if token.trim().is_empty() {
            return Err(AuthError::TokenLeer);
        }

        let mut tokens = self.tokens.write().await;
        match tokens.get(token) {
            Some(vorhanden) if *vorhanden != user_id => Err(AuthError::TokenVergeben),
            _ => {
                tracing::debug!(user_id = %user_id, "Token registriert");
                tokens.insert(token.to_string(), user_id);
                Ok(())
            }
        }
    }

    /// Loest einen Token zur Teilnehmer-ID auf
    pub async fn validieren(&self, token: &str) -> AuthResult<UserId> {
        self.tokens
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or(AuthError::TokenUnbekannt)
    }

    /// Anzahl registrierter Tokens
    pub async fn anzahl(&self) -> usize {
        self.tokens.read().await.len()
    }
}

#[async_trait]
impl TokenResolver for SessionStore {
    async fn aufloesen(&self, token: &str) -> AuthResult<UserId> {
        self.validieren(token).await
    }
}
