//! In-Memory-Implementierung aller Repository-Traits
//!
//! Fuer Einzelinstanz-Betrieb, Tests und den Start ohne externe Datenbank.
//! Profile liegen in einer DashMap, das Anrufprotokoll in einem
//! RwLock-geschuetzten Vec (nur angehaengt, nie veraendert).

use async_trait::async_trait;
use dashmap::DashMap;
use klingel_core::types::UserId;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::DbError;
use crate::models::{AnrufDatensatz, BenutzerProfil};
use crate::repository::{CallLogRepository, DbResult, ProfileRepository, RosterRepository};

/// In-Memory-Datenbank
///
/// Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct MemoryDb {
    inner: Arc<MemoryDbInner>,
}

#[derive(Default)]
struct MemoryDbInner {
    benutzer: DashMap<UserId, BenutzerProfil>,
    anrufe: RwLock<Vec<AnrufDatensatz>>,
}

impl MemoryDb {
    /// Erstellt eine leere In-Memory-Datenbank
    pub fn neu() -> Self {
        Self::default()
    }

    /// Legt einen neuen Benutzer an
    ///
    /// Benutzernamen sind eindeutig (ohne Beachtung der Gross-/Kleinschreibung).
    pub fn benutzer_anlegen(&self, profil: BenutzerProfil) -> DbResult<()> {
        let name_vergeben = self.inner.benutzer.iter().any(|e| {
            e.key() != &profil.id && e.username.eq_ignore_ascii_case(&profil.username)
        });
        if name_vergeben {
            return Err(DbError::Eindeutigkeit(format!(
                "Benutzername '{}' bereits vergeben",
                profil.username
            )));
        }
        if self.inner.benutzer.contains_key(&profil.id) {
            return Err(DbError::Eindeutigkeit(format!(
                "Benutzer-ID '{}' bereits vergeben",
                profil.id
            )));
        }

        tracing::debug!(user_id = %profil.id, username = %profil.username, "Benutzer angelegt");
        self.inner.benutzer.insert(profil.id.clone(), profil);
        Ok(())
    }

    /// Anzahl der bekannten Benutzer
    pub fn benutzer_anzahl(&self) -> usize {
        self.inner.benutzer.len()
    }
}

#[async_trait]
impl ProfileRepository for MemoryDb {
    async fn profil_laden(&self, id: &UserId) -> DbResult<Option<BenutzerProfil>> {
        Ok(self.inner.benutzer.get(id).map(|e| e.clone()))
    }
}

#[async_trait]
impl RosterRepository for MemoryDb {
    async fn alle_benutzer(&self) -> DbResult<Vec<BenutzerProfil>> {
        let mut alle: Vec<BenutzerProfil> =
            self.inner.benutzer.iter().map(|e| e.value().clone()).collect();
        alle.sort_by_key(|p| p.username.to_lowercase());
        Ok(alle)
    }
}

#[async_trait]
impl CallLogRepository for MemoryDb {
    async fn speichern(&self, datensatz: AnrufDatensatz) -> DbResult<()> {
        tracing::debug!(call_id = %datensatz.call_id, dauer_sek = datensatz.dauer_sek, "Gespraech protokolliert");
        self.inner.anrufe.write().await.push(datensatz);
        Ok(())
    }

    async fn verlauf(&self, user_id: &UserId, limit: usize) -> DbResult<Vec<AnrufDatensatz>> {
        let anrufe = self.inner.anrufe.read().await;
        let mut treffer: Vec<AnrufDatensatz> =
            anrufe.iter().filter(|a| a.betrifft(user_id)).cloned().collect();
        treffer.sort_by(|a, b| b.ende.cmp(&a.ende));
        treffer.truncate(limit);
        Ok(treffer)
    }
}
