//! Anrufprotokoll-Task
//!
//! Abgeschlossene Gespraeche werden ueber einen unbeschraenkten Kanal an
//! einen eigenen Task uebergeben. Fehler des Anrufprotokolls werden nur
//! geloggt; der Live-Zustand ist zu diesem Zeitpunkt bereits verworfen.

use klingel_db::{AnrufDatensatz, CallLogRepository};
use klingel_observability::HealthState;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Startet den Task und gibt die Sendeseite zurueck
///
/// Der Task endet, sobald alle Sender verworfen sind.
pub(crate) fn starten(
    repo: Arc<dyn CallLogRepository>,
    health: HealthState,
) -> mpsc::UnboundedSender<AnrufDatensatz> {
    let (tx, mut rx) = mpsc::unbounded_channel::<AnrufDatensatz>();

    tokio::spawn(async move {
        while let Some(datensatz) = rx.recv().await {
            let call_id = datensatz.call_id;
            match repo.speichern(datensatz).await {
                Ok(()) => {
                    health.persistenz_status_setzen(true);
                    tracing::debug!(call_id = %call_id, "Gespraech protokolliert");
                }
                Err(e) => {
                    health.persistenz_status_setzen(false);
                    tracing::error!(call_id = %call_id, fehler = %e, "Anrufprotokoll fehlgeschlagen");
                }
            }
        }
        tracing::debug!("Anrufprotokoll-Task beendet");
    });

    tx
}
