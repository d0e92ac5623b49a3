//! Broadcast-Koordinator – Verteilt den Roster an alle Verbundenen
//!
//! Wird nach jeder Aenderung von Mitgliedschaft oder Status aufgerufen.
//! Schlaegt die Zustellung an einen Teilnehmer fehl, wird er entfernt und
//! die Runde fuer alle uebrigen wiederholt, bis eine Runde ohne Fehler
//! durchlaeuft.

use klingel_core::types::UserId;
use klingel_db::BenutzerProfil;
use klingel_protocol::{RosterEntry, ServerMessage};

use crate::roster::roster_erstellen;
use crate::server_state::{SignalingState, TrennGrund};

impl SignalingState {
    /// Roster aus Sicht eines Teilnehmers
    pub async fn roster_fuer(&self, id: &UserId) -> Vec<RosterEntry> {
        let bekannte = self.bekannte_identitaeten().await;
        let live = self.zustand.lock().presence.verbundene_auflisten(None);
        roster_erstellen(&bekannte, &live, Some(id))
    }

    /// Sendet jedem Verbundenen seinen aktuellen Roster
    ///
    /// Momentaufnahme und Einreihen geschehen unter demselben Lock. Zwei
    /// gleichzeitige Runden koennen sich dadurch nicht ueberholen: wer den
    /// Lock zuletzt haelt, reiht den neuesten Stand zuletzt ein.
    /// Gibt die Anzahl erfolgreicher Zustellungen der letzten Runde zurueck.
    pub async fn alle_aktualisieren(&self) -> usize {
        let mut runde = 0u32;
        loop {
            runde += 1;
            let bekannte = self.bekannte_identitaeten().await;

            let mut zugestellt = 0;
            let mut fehlgeschlagen = Vec::new();
            {
                let z = self.zustand.lock();
                let live = z.presence.verbundene_auflisten(None);
                for (id, transport) in z.presence.transporte() {
                    let users = roster_erstellen(&bekannte, &live, Some(&id));
                    if transport.senden(ServerMessage::UserList { users }) {
                        zugestellt += 1;
                    } else {
                        fehlgeschlagen.push((id, transport.verbindungs_id()));
                    }
                }
            }

            if fehlgeschlagen.is_empty() {
                tracing::trace!(empfaenger = zugestellt, runde, "Roster verteilt");
                return zugestellt;
            }

            for (id, verbindung) in fehlgeschlagen {
                tracing::warn!(user_id = %id, "Roster-Zustellung fehlgeschlagen");
                self.trennen_ohne_broadcast(&id, verbindung, TrennGrund::SendeFehler);
            }
        }
    }

    async fn bekannte_identitaeten(&self) -> Vec<BenutzerProfil> {
        match self.kollaborateure.roster.alle_benutzer().await {
            Ok(alle) => alle,
            Err(e) => {
                tracing::warn!(fehler = %e, "Roster-Quelle nicht verfuegbar, nur Verbundene");
                Vec::new()
            }
        }
    }
}
