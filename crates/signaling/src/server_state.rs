//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Registry, Pending-Queues und laufende Gespraeche liegen zusammen hinter
//! EINEM Mutex. Waehrend der Mutex gehalten wird, findet kein I/O statt:
//! Nachrichten werden hoechstens in unbeschraenkte Sende-Queues eingereiht,
//! geschrieben wird erst im jeweiligen Verbindungs-Task.

use klingel_auth::TokenResolver;
use klingel_core::types::UserId;
use klingel_db::{
    AnrufDatensatz, BenutzerProfil, CallLogRepository, ProfileRepository, RosterRepository,
};
use klingel_observability::{HealthState, KlingelMetrics};
use klingel_protocol::ServerMessage;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::calls::{AnrufTabelle, Zeitpunkt};
use crate::pending::{PendingQueue, PendingSignal};
use crate::presence::{
    PresenceRegistry, TeilnehmerAnsicht, Teilnehmer, TransportEmpfaenger, TransportHandle,
    VerbindungsId,
};
use crate::recorder;

/// Text der `peer_disconnected`-Nachricht
pub const PARTNER_GETRENNT_TEXT: &str = "Dein Gespraechspartner hat die Verbindung getrennt";

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Abstand zwischen zwei Liveness-Pruefungen
    pub liveness_intervall: Duration,
    /// Maximales Alter des letzten Lebenszeichens
    pub liveness_timeout: Duration,
    /// Maximale Pending-Signale pro Ziel (None = unbegrenzt)
    pub pending_obergrenze: Option<usize>,
    /// Obergrenze fuer `get_call_history.limit`
    pub verlauf_max_limit: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            liveness_intervall: Duration::from_secs(60),
            liveness_timeout: Duration::from_secs(30),
            pending_obergrenze: None,
            verlauf_max_limit: 200,
        }
    }
}

// ---------------------------------------------------------------------------
// Kollaborateure
// ---------------------------------------------------------------------------

/// Externe Kollaborateure des Signaling-Kerns
#[derive(Clone)]
pub struct Kollaborateure {
    pub tokens: Arc<dyn TokenResolver>,
    pub profile: Arc<dyn ProfileRepository>,
    pub roster: Arc<dyn RosterRepository>,
    pub anrufprotokoll: Arc<dyn CallLogRepository>,
}

impl Kollaborateure {
    /// Alle Persistenz-Schnittstellen aus einer einzigen Datenbank
    pub fn mit_datenbank<D>(tokens: Arc<dyn TokenResolver>, db: Arc<D>) -> Self
    where
        D: ProfileRepository + RosterRepository + CallLogRepository + 'static,
    {
        Self {
            tokens,
            profile: db.clone(),
            roster: db.clone(),
            anrufprotokoll: db,
        }
    }
}

// ---------------------------------------------------------------------------
// Zustand
// ---------------------------------------------------------------------------

/// Alles was unter dem gemeinsamen Mutex liegt
#[derive(Debug)]
pub struct Zustand {
    pub presence: PresenceRegistry,
    pub pending: PendingQueue,
    pub anrufe: AnrufTabelle,
}

/// Ursache einer Trennung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrennGrund {
    /// Client hat die Verbindung geschlossen
    Client,
    /// Lese- oder Schreibfehler auf dem Transport
    Transportfehler,
    /// Kein Lebenszeichen innerhalb des Timeouts
    Liveness,
    /// Sende-Queue geschlossen
    SendeFehler,
    /// Neue Verbindung mit derselben Teilnehmer-ID
    Verdraengt,
    /// Server schliesst die Verbindung
    Server,
}

impl TrennGrund {
    /// Label fuer `klingel_evictions_total`, nur fuer Zwangstrennungen
    pub fn eviction_label(&self) -> Option<&'static str> {
        match self {
            Self::Liveness => Some("liveness"),
            Self::SendeFehler => Some("send_failure"),
            Self::Verdraengt => Some("superseded"),
            Self::Client | Self::Transportfehler | Self::Server => None,
        }
    }
}

/// Ergebnis einer Entfernung unter dem Lock, Nacharbeit erfolgt danach
struct Entfernung {
    teilnehmer: Teilnehmer,
    datensatz: Option<AnrufDatensatz>,
    partner_transport: Option<TransportHandle>,
}

// ---------------------------------------------------------------------------
// SignalingState
// ---------------------------------------------------------------------------

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    pub config: SignalingConfig,
    pub(crate) zustand: Mutex<Zustand>,
    pub(crate) kollaborateure: Kollaborateure,
    recorder_tx: mpsc::UnboundedSender<AnrufDatensatz>,
    pub metriken: KlingelMetrics,
    pub health: HealthState,
    pub start_time: Instant,
}

impl SignalingState {
    /// Erstellt den Zustand und startet den Anrufprotokoll-Task
    ///
    /// Muss innerhalb einer tokio-Runtime aufgerufen werden.
    pub fn neu(
        config: SignalingConfig,
        kollaborateure: Kollaborateure,
        metriken: KlingelMetrics,
        health: HealthState,
    ) -> Arc<Self> {
        let recorder_tx =
            recorder::starten(Arc::clone(&kollaborateure.anrufprotokoll), health.clone());
        let zustand = Zustand {
            presence: PresenceRegistry::neu(),
            pending: PendingQueue::neu(config.pending_obergrenze),
            anrufe: AnrufTabelle::neu(),
        };
        Arc::new(Self {
            config,
            zustand: Mutex::new(zustand),
            kollaborateure,
            recorder_tx,
            metriken,
            health,
            start_time: Instant::now(),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn verbundene_anzahl(&self) -> usize {
        self.zustand.lock().presence.anzahl()
    }

    pub fn laufende_anrufe(&self) -> usize {
        self.zustand.lock().anrufe.anzahl()
    }

    pub fn teilnehmer(&self, id: &UserId) -> Option<TeilnehmerAnsicht> {
        self.zustand.lock().presence.abrufen(id)
    }

    pub fn pending_anzahl(&self, id: &UserId) -> usize {
        self.zustand.lock().pending.anzahl(id)
    }

    /// Vermerkt ein Lebenszeichen fuer den Teilnehmer
    ///
    /// Zaehlt nur, solange `verbindung` die aktuelle Verbindung des
    /// Teilnehmers ist. Frames einer verdraengten Verbindung halten den
    /// Nachfolger nicht am Leben.
    pub fn beruehren(&self, id: &UserId, verbindung: VerbindungsId) -> bool {
        let mut z = self.zustand.lock();
        if z.presence.verbindung(id) != Some(verbindung) {
            return false;
        }
        z.presence.beruehren(id, Instant::now())
    }

    /// Nimmt einen Teilnehmer auf und stellt seine Pending-Signale zu
    ///
    /// Eine bestehende Verbindung derselben ID wird verdraengt. Die
    /// Pending-Signale werden noch unter dem Lock eingereiht, damit kein
    /// Live-Signal sie ueberholen kann. Gibt die Anzahl zugestellter
    /// Pending-Signale zurueck. Broadcastet nicht.
    pub fn zulassen(&self, profil: BenutzerProfil, transport: TransportHandle) -> usize {
        let jetzt = Zeitpunkt::jetzt();
        let id = profil.id.clone();

        let (verdraengt, zugestellt) = {
            let mut guard = self.zustand.lock();
            let z = &mut *guard;

            let verdraengt = Self::entfernen_gesperrt(z, &id, None, jetzt);
            z.presence.zulassen(profil, transport.clone(), jetzt.mono);

            let pending = z.pending.abholen(&id);
            let zugestellt = pending.len();
            for signal in pending {
                transport.senden(signal.in_nachricht());
            }

            self.gauges_aktualisieren(z);
            (verdraengt, zugestellt)
        };

        if let Some(alt) = verdraengt {
            tracing::warn!(
                user_id = %id,
                alte_verbindung = %alt.teilnehmer.transport.verbindungs_id(),
                "Bestehende Verbindung verdraengt"
            );
            self.nachbereiten(alt, TrennGrund::Verdraengt);
        }

        if zugestellt > 0 {
            self.metriken
                .signals_total
                .with_label_values(&["delivered_pending"])
                .inc_by(zugestellt as u64);
            tracing::debug!(user_id = %id, anzahl = zugestellt, "Pending-Signale zugestellt");
        }

        tracing::info!(
            user_id = %id,
            verbindung = %transport.verbindungs_id(),
            "Teilnehmer zugelassen"
        );
        zugestellt
    }

    /// Einziger Abbaupfad fuer alle Trennungsursachen, ohne Broadcast
    ///
    /// Entfernt nur, wenn der Datensatz noch zu `verbindung` gehoert.
    /// Gibt `true` zurueck wenn etwas entfernt wurde.
    pub fn trennen_ohne_broadcast(
        &self,
        id: &UserId,
        verbindung: VerbindungsId,
        grund: TrennGrund,
    ) -> bool {
        let jetzt = Zeitpunkt::jetzt();
        let entfernung = {
            let mut guard = self.zustand.lock();
            let z = &mut *guard;
            let entfernung = Self::entfernen_gesperrt(z, id, Some(verbindung), jetzt);
            self.gauges_aktualisieren(z);
            entfernung
        };

        match entfernung {
            Some(e) => {
                self.nachbereiten(e, grund);
                true
            }
            None => false,
        }
    }

    /// Trennt wegen Liveness-Timeout, aber nur wenn das Alter unter dem Lock
    /// noch ueber `timeout` liegt
    ///
    /// Gibt `true` zurueck wenn etwas entfernt wurde. Broadcastet nicht.
    pub fn trennen_wenn_abgelaufen(
        &self,
        id: &UserId,
        verbindung: VerbindungsId,
        jetzt: Instant,
        timeout: Duration,
    ) -> bool {
        let zeit = Zeitpunkt::jetzt();
        let entfernung = {
            let mut guard = self.zustand.lock();
            let z = &mut *guard;
            if !z.presence.ist_abgelaufen(id, verbindung, jetzt, timeout) {
                return false;
            }
            let entfernung = Self::entfernen_gesperrt(z, id, Some(verbindung), zeit);
            self.gauges_aktualisieren(z);
            entfernung
        };

        match entfernung {
            Some(e) => {
                self.nachbereiten(e, TrennGrund::Liveness);
                true
            }
            None => false,
        }
    }

    /// Trennt einen Teilnehmer und verteilt danach den Roster neu
    pub async fn trennen(&self, id: &UserId, verbindung: VerbindungsId, grund: TrennGrund) -> bool {
        let entfernt = self.trennen_ohne_broadcast(id, verbindung, grund);
        if entfernt {
            self.alle_aktualisieren().await;
        }
        entfernt
    }

    /// Rettet WebRTC-Signale aus der Sende-Queue einer endenden Verbindung
    ///
    /// Schliesst die Queue und entnimmt unter dem Lock alles, was noch nicht
    /// geschrieben wurde, `offen` (die Nachricht, deren Schreiben
    /// fehlschlug) zuerst. Signale gehen an eine inzwischen aktuelle
    /// Nachfolgeverbindung oder, wenn es keine gibt, vor alle wartenden
    /// Signale in die Pending-Queue. Andere Nachrichten werden verworfen.
    /// Gibt die Anzahl geretteter Signale zurueck.
    pub fn signale_retten(
        &self,
        id: &UserId,
        verbindung: VerbindungsId,
        empfaenger: &mut TransportEmpfaenger,
        offen: Option<ServerMessage>,
    ) -> usize {
        let mut z = self.zustand.lock();
        empfaenger.nachrichten.close();

        let ungeschrieben = offen
            .into_iter()
            .chain(std::iter::from_fn(|| empfaenger.nachrichten.try_recv().ok()));
        let signale: Vec<PendingSignal> = ungeschrieben
            .filter_map(|nachricht| match nachricht {
                ServerMessage::WebrtcSignal { signal, sender_id } => Some(PendingSignal {
                    absender: sender_id,
                    ziel: id.clone(),
                    signal,
                }),
                _ => None,
            })
            .collect();
        if signale.is_empty() {
            return 0;
        }
        let gerettet = signale.len();

        let nachfolger = z
            .presence
            .transport(id)
            .filter(|t| t.verbindungs_id() != verbindung);

        let mut zurueckgehalten = Vec::new();
        for signal in signale {
            // Nach dem ersten Fehlschlag bleibt der Rest in Reihenfolge zurueck
            if zurueckgehalten.is_empty() {
                if let Some(t) = &nachfolger {
                    if t.senden(signal.clone().in_nachricht()) {
                        continue;
                    }
                }
            }
            zurueckgehalten.push(signal);
        }
        let eingereiht = zurueckgehalten.len();
        z.pending.voranstellen(id, zurueckgehalten);
        drop(z);

        self.metriken
            .signals_total
            .with_label_values(&["requeued"])
            .inc_by(gerettet as u64);
        tracing::info!(
            user_id = %id,
            verbindung = %verbindung,
            gerettet,
            eingereiht,
            "Ungeschriebene Signale gerettet"
        );
        gerettet
    }

    /// Fordert alle Verbindungen auf, sich zu schliessen
    pub fn herunterfahren(&self) -> usize {
        let transporte = self.zustand.lock().presence.transporte();
        for (_, transport) in &transporte {
            transport.schliessen();
        }
        transporte.len()
    }

    /// Uebergibt einen abgeschlossenen Gespraechsdatensatz an das Anrufprotokoll
    pub(crate) fn protokollieren(&self, datensatz: AnrufDatensatz) {
        self.metriken.anruf_zaehlen("completed");
        if self.recorder_tx.send(datensatz).is_err() {
            tracing::error!("Anrufprotokoll-Task nicht erreichbar, Datensatz verworfen");
        }
    }

    pub(crate) fn gauges_aktualisieren(&self, z: &Zustand) {
        self.metriken
            .connected_participants
            .set(z.presence.anzahl() as i64);
        self.metriken.active_calls.set(z.anrufe.anzahl() as i64);
    }

    fn entfernen_gesperrt(
        z: &mut Zustand,
        id: &UserId,
        verbindung: Option<VerbindungsId>,
        jetzt: Zeitpunkt,
    ) -> Option<Entfernung> {
        let teilnehmer = z.presence.entfernen(id, verbindung)?;
        let datensatz = z.anrufe.nach_trennung(&teilnehmer, jetzt);
        let partner_transport = teilnehmer
            .partner
            .as_ref()
            .and_then(|p| z.presence.transport(p));
        Some(Entfernung {
            teilnehmer,
            datensatz,
            partner_transport,
        })
    }

    /// Nacharbeit ausserhalb des Locks
    fn nachbereiten(&self, entfernung: Entfernung, grund: TrennGrund) {
        let Entfernung {
            teilnehmer,
            datensatz,
            partner_transport,
        } = entfernung;
        let id = teilnehmer.id().clone();

        teilnehmer.transport.schliessen();

        if let Some(partner) = partner_transport {
            let hinweis = ServerMessage::PeerDisconnected {
                user_id: id.clone(),
                message: PARTNER_GETRENNT_TEXT.to_string(),
            };
            if !partner.senden(hinweis) {
                tracing::debug!(user_id = %id, "Partner nicht mehr erreichbar");
            }
        }

        if let Some(datensatz) = datensatz {
            tracing::info!(
                call_id = %datensatz.call_id,
                dauer_sek = datensatz.dauer_sek,
                "Gespraech durch Trennung beendet"
            );
            self.protokollieren(datensatz);
        }

        if let Some(label) = grund.eviction_label() {
            self.metriken.entfernung_zaehlen(label);
        }

        tracing::info!(
            user_id = %id,
            verbindung = %teilnehmer.transport.verbindungs_id(),
            grund = ?grund,
            status_vorher = %teilnehmer.status,
            "Teilnehmer entfernt"
        );
    }
}
