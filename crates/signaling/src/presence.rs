//! Presence-Registry – Wer ist verbunden, mit welchem Status
//!
//! Haelt genau einen Datensatz pro verbundenem Teilnehmer: Profil, Status,
//! Gespraechspartner, Transport-Handle und Zeitpunkt des letzten
//! Lebenszeichens. Die Registry selbst ist nicht synchronisiert; sie lebt
//! zusammen mit Warteschlangen und Anruftabelle hinter einem Mutex
//! (siehe `server_state::Zustand`) und verschickt nie selbst Nachrichten.

use klingel_core::types::UserId;
use klingel_db::BenutzerProfil;
use klingel_protocol::{ServerMessage, UserStatus};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

static NAECHSTE_VERBINDUNG: AtomicU64 = AtomicU64::new(1);

/// Eindeutige ID einer einzelnen Transportverbindung
///
/// Unterscheidet aufeinanderfolgende Verbindungen desselben Teilnehmers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VerbindungsId(u64);

impl VerbindungsId {
    fn naechste() -> Self {
        Self(NAECHSTE_VERBINDUNG.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for VerbindungsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Sende-Handle auf die ausgehende Queue einer Verbindung
///
/// Clone ist billig und verweist auf dieselbe Queue.
#[derive(Clone, Debug)]
pub struct TransportHandle {
    verbindungs_id: VerbindungsId,
    tx: mpsc::UnboundedSender<ServerMessage>,
    schliessen_tx: Arc<watch::Sender<bool>>,
}

/// Empfangsseite einer Verbindung, gehoert dem Verbindungs-Task
#[derive(Debug)]
pub struct TransportEmpfaenger {
    pub verbindungs_id: VerbindungsId,
    /// Ausgehende Nachrichten in Sende-Reihenfolge
    pub nachrichten: mpsc::UnboundedReceiver<ServerMessage>,
    /// Wechselt auf `true` wenn der Server die Verbindung schliesst
    pub schliessen: watch::Receiver<bool>,
}

impl TransportHandle {
    /// Erstellt ein neues Handle mit frischer Verbindungs-ID
    pub fn neu() -> (Self, TransportEmpfaenger) {
        let verbindungs_id = VerbindungsId::naechste();
        let (tx, nachrichten) = mpsc::unbounded_channel();
        let (schliessen_tx, schliessen) = watch::channel(false);
        (
            Self {
                verbindungs_id,
                tx,
                schliessen_tx: Arc::new(schliessen_tx),
            },
            TransportEmpfaenger {
                verbindungs_id,
                nachrichten,
                schliessen,
            },
        )
    }

    pub fn verbindungs_id(&self) -> VerbindungsId {
        self.verbindungs_id
    }

    /// Reiht eine Nachricht nicht-blockierend ein
    ///
    /// Gibt `false` zurueck wenn die Empfangsseite nicht mehr existiert.
    pub fn senden(&self, nachricht: ServerMessage) -> bool {
        self.tx.send(nachricht).is_ok()
    }

    /// Fordert den Verbindungs-Task auf, den Transport zu schliessen
    pub fn schliessen(&self) {
        self.schliessen_tx.send_replace(true);
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.tx.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Teilnehmer
// ---------------------------------------------------------------------------

/// Datensatz eines verbundenen Teilnehmers
#[derive(Debug, Clone)]
pub struct Teilnehmer {
    pub profil: BenutzerProfil,
    pub status: UserStatus,
    pub partner: Option<UserId>,
    pub transport: TransportHandle,
    pub zuletzt_gesehen: Instant,
}

impl Teilnehmer {
    pub fn id(&self) -> &UserId {
        &self.profil.id
    }

    /// Lesende Kopie ohne Transport
    pub fn ansicht(&self) -> TeilnehmerAnsicht {
        TeilnehmerAnsicht {
            id: self.profil.id.clone(),
            username: self.profil.username.clone(),
            avatar_url: self.profil.avatar_url.clone(),
            status: self.status,
            partner: self.partner.clone(),
            verbindungs_id: self.transport.verbindungs_id(),
            zuletzt_gesehen: self.zuletzt_gesehen,
        }
    }
}

/// Momentaufnahme eines Teilnehmers
#[derive(Debug, Clone, PartialEq)]
pub struct TeilnehmerAnsicht {
    pub id: UserId,
    pub username: String,
    pub avatar_url: Option<String>,
    pub status: UserStatus,
    pub partner: Option<UserId>,
    pub verbindungs_id: VerbindungsId,
    pub zuletzt_gesehen: Instant,
}

// ---------------------------------------------------------------------------
// PresenceRegistry
// ---------------------------------------------------------------------------

/// Tabelle aller verbundenen Teilnehmer
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    pub(crate) teilnehmer: HashMap<UserId, Teilnehmer>,
}

impl PresenceRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Nimmt einen Teilnehmer mit Status `available` auf
    ///
    /// Ein bereits vorhandener Datensatz derselben ID wird ersetzt und
    /// zurueckgegeben. Der Aufrufer schliesst dessen Transport und loest
    /// dessen Gespraechsverknuepfung wie bei einer Trennung.
    pub fn zulassen(
        &mut self,
        profil: BenutzerProfil,
        transport: TransportHandle,
        jetzt: Instant,
    ) -> Option<Teilnehmer> {
        let id = profil.id.clone();
        let neu = Teilnehmer {
            profil,
            status: UserStatus::Available,
            partner: None,
            transport,
            zuletzt_gesehen: jetzt,
        };
        self.teilnehmer.insert(id, neu)
    }

    /// Entfernt einen Teilnehmer
    ///
    /// Mit `verbindung` wird nur entfernt, wenn der Datensatz zu genau dieser
    /// Verbindung gehoert. Ein verknuepfter Partner wird entkoppelt und auf
    /// `available` zurueckgesetzt.
    pub fn entfernen(
        &mut self,
        id: &UserId,
        verbindung: Option<VerbindungsId>,
    ) -> Option<Teilnehmer> {
        let passt = match (self.teilnehmer.get(id), verbindung) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(t), Some(vid)) => t.transport.verbindungs_id() == vid,
        };
        if !passt {
            return None;
        }

        let entfernt = self.teilnehmer.remove(id)?;
        if let Some(partner_id) = &entfernt.partner {
            if let Some(partner) = self.teilnehmer.get_mut(partner_id) {
                if partner.partner.as_ref() == Some(id) {
                    partner.status = UserStatus::Available;
                    partner.partner = None;
                }
            }
        }
        Some(entfernt)
    }

    /// Setzt Status und Partner atomar
    ///
    /// Gibt `false` zurueck wenn der Teilnehmer nicht verbunden ist.
    pub fn status_setzen(
        &mut self,
        id: &UserId,
        status: UserStatus,
        partner: Option<UserId>,
    ) -> bool {
        match self.teilnehmer.get_mut(id) {
            Some(t) => {
                t.status = status;
                t.partner = partner;
                true
            }
            None => false,
        }
    }

    pub fn abrufen(&self, id: &UserId) -> Option<TeilnehmerAnsicht> {
        self.teilnehmer.get(id).map(Teilnehmer::ansicht)
    }

    pub fn ist_verbunden(&self, id: &UserId) -> bool {
        self.teilnehmer.contains_key(id)
    }

    /// Verbindungs-ID des aktuellen Datensatzes
    pub fn verbindung(&self, id: &UserId) -> Option<VerbindungsId> {
        self.teilnehmer.get(id).map(|t| t.transport.verbindungs_id())
    }

    pub fn transport(&self, id: &UserId) -> Option<TransportHandle> {
        self.teilnehmer.get(id).map(|t| t.transport.clone())
    }

    /// Alle Transport-Handles mit Teilnehmer-ID
    pub fn transporte(&self) -> Vec<(UserId, TransportHandle)> {
        self.teilnehmer
            .iter()
            .map(|(id, t)| (id.clone(), t.transport.clone()))
            .collect()
    }

    /// Verbundene Teilnehmer, sortiert nach Anzeigename (ohne Gross-/Kleinschreibung)
    pub fn verbundene_auflisten(&self, ausser: Option<&UserId>) -> Vec<TeilnehmerAnsicht> {
        let mut liste: Vec<TeilnehmerAnsicht> = self
            .teilnehmer
            .values()
            .filter(|t| Some(t.id()) != ausser)
            .map(Teilnehmer::ansicht)
            .collect();
        liste.sort_by(|a, b| {
            a.username
                .to_lowercase()
                .cmp(&b.username.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        liste
    }

    /// Ersetzt das Profil eines verbundenen Teilnehmers
    pub fn profil_aktualisieren(&mut self, profil: BenutzerProfil) -> bool {
        match self.teilnehmer.get_mut(&profil.id) {
            Some(t) => {
                t.profil = profil;
                true
            }
            None => false,
        }
    }

    pub fn anzahl(&self) -> usize {
        self.teilnehmer.len()
    }
}
