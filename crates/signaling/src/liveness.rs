//! Liveness-Tracker – Lebenszeichen und Zeitueberschreitung
//!
//! Jeder verbundene Teilnehmer traegt den Zeitpunkt seines letzten
//! Lebenszeichens. Ein periodischer Task sucht Teilnehmer, deren letztes
//! Lebenszeichen laenger als das Timeout zurueckliegt, und trennt sie.

use klingel_core::types::UserId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::presence::{PresenceRegistry, VerbindungsId};
use crate::server_state::SignalingState;

impl PresenceRegistry {
    /// Vermerkt ein Lebenszeichen
    ///
    /// Gibt `false` zurueck wenn der Teilnehmer nicht verbunden ist. Der
    /// Zeitstempel wird nie zurueckgesetzt.
    pub fn beruehren(&mut self, id: &UserId, jetzt: Instant) -> bool {
        match self.teilnehmer.get_mut(id) {
            Some(t) => {
                t.zuletzt_gesehen = t.zuletzt_gesehen.max(jetzt);
                true
            }
            None => false,
        }
    }

    /// Teilnehmer deren letztes Lebenszeichen aelter als `timeout` ist
    ///
    /// Entfernt nichts. Liefert die Verbindungs-ID mit, damit nur genau
    /// diese Verbindung getrennt wird.
    pub fn abgelaufene(&self, jetzt: Instant, timeout: Duration) -> Vec<(UserId, VerbindungsId)> {
        self.teilnehmer
            .iter()
            .filter(|(_, t)| jetzt.saturating_duration_since(t.zuletzt_gesehen) > timeout)
            .map(|(id, t)| (id.clone(), t.transport.verbindungs_id()))
            .collect()
    }

    /// Prueft ob genau diese Verbindung noch abgelaufen ist
    pub fn ist_abgelaufen(
        &self,
        id: &UserId,
        verbindung: VerbindungsId,
        jetzt: Instant,
        timeout: Duration,
    ) -> bool {
        self.teilnehmer.get(id).is_some_and(|t| {
            t.transport.verbindungs_id() == verbindung
                && jetzt.saturating_duration_since(t.zuletzt_gesehen) > timeout
        })
    }
}

/// Startet den periodischen Liveness-Check
///
/// Laeuft unabhaengig von der Nachrichtenverarbeitung bis `shutdown_rx`
/// auf `true` wechselt.
pub fn ueberwachung_starten(
    state: Arc<SignalingState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let intervall = state.config.liveness_intervall;
    let timeout = state.config.liveness_timeout;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(intervall);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Erster Tick kommt sofort
        ticker.tick().await;

        tracing::info!(
            intervall_sek = intervall.as_secs(),
            timeout_sek = timeout.as_secs(),
            "Liveness-Ueberwachung gestartet"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let entfernt = abgelaufene_trennen(&state, Instant::now()).await;
                    if entfernt > 0 {
                        tracing::info!(anzahl = entfernt, "Inaktive Teilnehmer getrennt");
                    }
                }
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Liveness-Ueberwachung beendet");
    })
}

/// Ein Durchlauf: findet abgelaufene Teilnehmer und trennt sie
///
/// Das Alter wird beim Entfernen unter dem Lock erneut geprueft. Ein
/// Lebenszeichen zwischen Suche und Entfernung verhindert die Trennung.
/// Gibt die Anzahl der getrennten Teilnehmer zurueck.
pub async fn abgelaufene_trennen(state: &SignalingState, jetzt: Instant) -> usize {
    let timeout = state.config.liveness_timeout;
    let kandidaten = state.zustand.lock().presence.abgelaufene(jetzt, timeout);

    let mut entfernt = 0;
    for (id, verbindung) in kandidaten {
        if state.trennen_wenn_abgelaufen(&id, verbindung, jetzt, timeout) {
            tracing::warn!(user_id = %id, "Liveness-Timeout");
            entfernt += 1;
        }
    }
    if entfernt > 0 {
        state.alle_aktualisieren().await;
    }
    entfernt
}
