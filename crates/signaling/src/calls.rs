//! Anruf-Zustandsmaschine – Zwei-Parteien-Gespraeche
//!
//! ## Zustaende
//! ```text
//! available --request--> calling / ringing --accept--> in_call / in_call
//!     ^                        |                             |
//!     +------ decline/end -----+------------ end ------------+
//! ```
//!
//! Die Partner-Verknuepfung ist immer symmetrisch. Beim Uebergang nach
//! `in_call` wird ein laufender Anruf unter einem ungeordneten Paar mit
//! frischer `CallId` abgelegt; beim Beenden wird daraus ein
//! `AnrufDatensatz` fuer das Anrufprotokoll.

use chrono::{DateTime, Utc};
use klingel_core::types::{CallId, UserId};
use klingel_db::{AnrufDatensatz, AnrufTyp};
use klingel_protocol::UserStatus;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;

use crate::presence::{PresenceRegistry, Teilnehmer, TeilnehmerAnsicht, TransportHandle};

// ---------------------------------------------------------------------------
// Hilfstypen
// ---------------------------------------------------------------------------

/// Wanduhr- und Monotonzeit desselben Moments
#[derive(Debug, Clone, Copy)]
pub struct Zeitpunkt {
    pub utc: DateTime<Utc>,
    pub mono: Instant,
}

impl Zeitpunkt {
    pub fn jetzt() -> Self {
        Self {
            utc: Utc::now(),
            mono: Instant::now(),
        }
    }
}

/// Ungeordnetes Teilnehmerpaar
///
/// `CallPair::neu(a, b) == CallPair::neu(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallPair {
    erster: UserId,
    zweiter: UserId,
}

impl CallPair {
    pub fn neu(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self {
                erster: a,
                zweiter: b,
            }
        } else {
            Self {
                erster: b,
                zweiter: a,
            }
        }
    }

    pub fn enthaelt(&self, id: &UserId) -> bool {
        &self.erster == id || &self.zweiter == id
    }
}

/// Ein verbundenes Gespraech
#[derive(Debug, Clone)]
pub struct LaufenderAnruf {
    pub call_id: CallId,
    pub anrufer: UserId,
    pub angerufener: UserId,
    pub beginn: Zeitpunkt,
}

impl LaufenderAnruf {
    /// Schliesst das Gespraech ab und berechnet die Dauer
    pub fn abschliessen(self, ende: Zeitpunkt) -> AnrufDatensatz {
        let dauer = ende.mono.saturating_duration_since(self.beginn.mono);
        AnrufDatensatz {
            call_id: self.call_id,
            anrufer: self.anrufer,
            angerufener: self.angerufener,
            beginn: self.beginn.utc,
            ende: ende.utc,
            dauer_sek: dauer.as_secs(),
            typ: AnrufTyp::Audio,
        }
    }
}

/// Verletzte Zustandsbedingung
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnrufFehler {
    #[error("Du bist nicht verbunden")]
    NichtVerbunden,

    #[error("Du kannst dich nicht selbst anrufen")]
    SichSelbst,

    #[error("Teilnehmer ist nicht erreichbar")]
    ZielNichtVerbunden(UserId),

    #[error("Du bist bereits in einem Anruf")]
    SelbstBelegt,

    #[error("Teilnehmer ist gerade beschaeftigt")]
    ZielBelegt(UserId),

    #[error("Kein laufender Anruf")]
    KeinPartner,

    #[error("Anruf ist nicht im erwarteten Zustand")]
    FalscherZustand,
}

// ---------------------------------------------------------------------------
// Ergebnisse
// ---------------------------------------------------------------------------

/// Erfolgreiche Anfrage: Anrufer klingelt beim Ziel
#[derive(Debug)]
pub struct Anfrage {
    pub anrufer: TeilnehmerAnsicht,
    pub ziel_transport: TransportHandle,
}

/// Erfolgreiche Annahme
#[derive(Debug)]
pub struct Annahme {
    pub call_id: CallId,
    pub anrufer: UserId,
    pub anrufer_transport: TransportHandle,
    pub angerufener_name: String,
}

/// Gespraech oder Klingeln wurde aufgeloest
#[derive(Debug)]
pub struct Aufloesung {
    pub partner: UserId,
    pub partner_transport: TransportHandle,
    /// Nur gesetzt wenn vorher `in_call`
    pub datensatz: Option<AnrufDatensatz>,
}

// ---------------------------------------------------------------------------
// AnrufTabelle
// ---------------------------------------------------------------------------

/// Laufende Gespraeche, indiziert nach ungeordnetem Paar
#[derive(Debug, Default)]
pub struct AnrufTabelle {
    laufend: HashMap<CallPair, LaufenderAnruf>,
}

impl AnrufTabelle {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn anzahl(&self) -> usize {
        self.laufend.len()
    }

    pub fn abrufen(&self, paar: &CallPair) -> Option<&LaufenderAnruf> {
        self.laufend.get(paar)
    }

    /// `available/available -> calling/ringing`
    pub fn anfragen(
        &mut self,
        reg: &mut PresenceRegistry,
        anrufer: &UserId,
        ziel: &UserId,
    ) -> Result<Anfrage, AnrufFehler> {
        let ich = reg.abrufen(anrufer).ok_or(AnrufFehler::NichtVerbunden)?;
        if anrufer == ziel {
            return Err(AnrufFehler::SichSelbst);
        }
        let gegenueber = reg
            .abrufen(ziel)
            .ok_or_else(|| AnrufFehler::ZielNichtVerbunden(ziel.clone()))?;
        if ich.status != UserStatus::Available {
            return Err(AnrufFehler::SelbstBelegt);
        }
        if gegenueber.status != UserStatus::Available {
            return Err(AnrufFehler::ZielBelegt(ziel.clone()));
        }
        let ziel_transport = reg
            .transport(ziel)
            .ok_or_else(|| AnrufFehler::ZielNichtVerbunden(ziel.clone()))?;

        reg.status_setzen(anrufer, UserStatus::Calling, Some(ziel.clone()));
        reg.status_setzen(ziel, UserStatus::Ringing, Some(anrufer.clone()));

        Ok(Anfrage {
            anrufer: ich,
            ziel_transport,
        })
    }

    /// `calling/ringing -> in_call/in_call`, nur durch den Angerufenen
    pub fn annehmen(
        &mut self,
        reg: &mut PresenceRegistry,
        angerufener: &UserId,
        jetzt: Zeitpunkt,
    ) -> Result<Annahme, AnrufFehler> {
        let (ich, partner) = gegenseitige_partner(reg, angerufener)?;
        if ich.status != UserStatus::Ringing || partner.status != UserStatus::Calling {
            return Err(AnrufFehler::FalscherZustand);
        }
        let anrufer_transport = reg
            .transport(&partner.id)
            .ok_or(AnrufFehler::KeinPartner)?;

        reg.status_setzen(&partner.id, UserStatus::InCall, Some(ich.id.clone()));
        reg.status_setzen(&ich.id, UserStatus::InCall, Some(partner.id.clone()));

        let anruf = LaufenderAnruf {
            call_id: CallId::new(),
            anrufer: partner.id.clone(),
            angerufener: ich.id.clone(),
            beginn: jetzt,
        };
        let call_id = anruf.call_id;
        self.laufend
            .insert(CallPair::neu(partner.id.clone(), ich.id.clone()), anruf);

        Ok(Annahme {
            call_id,
            anrufer: partner.id,
            anrufer_transport,
            angerufener_name: ich.username,
        })
    }

    /// `calling/ringing -> available/available`, durch eine der beiden Seiten
    pub fn ablehnen(
        &mut self,
        reg: &mut PresenceRegistry,
        akteur: &UserId,
    ) -> Result<Aufloesung, AnrufFehler> {
        let (ich, partner) = gegenseitige_partner(reg, akteur)?;
        let klingelt = matches!(
            (ich.status, partner.status),
            (UserStatus::Calling, UserStatus::Ringing) | (UserStatus::Ringing, UserStatus::Calling)
        );
        if !klingelt {
            return Err(AnrufFehler::FalscherZustand);
        }
        self.aufloesen(reg, ich, partner, None)
    }

    /// Beendet Klingeln oder Gespraech, durch eine der beiden Seiten
    ///
    /// Ein Datensatz entsteht nur wenn beide Seiten `in_call` waren.
    pub fn beenden(
        &mut self,
        reg: &mut PresenceRegistry,
        akteur: &UserId,
        jetzt: Zeitpunkt,
    ) -> Result<Aufloesung, AnrufFehler> {
        let (ich, partner) = gegenseitige_partner(reg, akteur)?;
        let gueltig = matches!(
            (ich.status, partner.status),
            (UserStatus::InCall, UserStatus::InCall)
                | (UserStatus::Calling, UserStatus::Ringing)
                | (UserStatus::Ringing, UserStatus::Calling)
        );
        if !gueltig {
            return Err(AnrufFehler::FalscherZustand);
        }
        self.aufloesen(reg, ich, partner, Some(jetzt))
    }

    /// Schliesst das Gespraech eines bereits entfernten Teilnehmers ab
    ///
    /// Die Registry hat den Partner zu diesem Zeitpunkt schon zurueckgesetzt.
    pub fn nach_trennung(
        &mut self,
        entfernt: &Teilnehmer,
        jetzt: Zeitpunkt,
    ) -> Option<AnrufDatensatz> {
        let partner = entfernt.partner.clone()?;
        if entfernt.status != UserStatus::InCall {
            return None;
        }
        self.laufend
            .remove(&CallPair::neu(entfernt.id().clone(), partner))
            .map(|anruf| anruf.abschliessen(jetzt))
    }

    fn aufloesen(
        &mut self,
        reg: &mut PresenceRegistry,
        ich: TeilnehmerAnsicht,
        partner: TeilnehmerAnsicht,
        ende: Option<Zeitpunkt>,
    ) -> Result<Aufloesung, AnrufFehler> {
        let partner_transport = reg
            .transport(&partner.id)
            .ok_or(AnrufFehler::KeinPartner)?;

        let laufend = self
            .laufend
            .remove(&CallPair::neu(ich.id.clone(), partner.id.clone()));
        let datensatz = match (laufend, ende) {
            (Some(anruf), Some(ende)) => Some(anruf.abschliessen(ende)),
            _ => None,
        };

        reg.status_setzen(&ich.id, UserStatus::Available, None);
        reg.status_setzen(&partner.id, UserStatus::Available, None);

        Ok(Aufloesung {
            partner: partner.id,
            partner_transport,
            datensatz,
        })
    }
}

/// Liefert Akteur und Partner, wenn beide gegenseitig verknuepft sind
fn gegenseitige_partner(
    reg: &PresenceRegistry,
    akteur: &UserId,
) -> Result<(TeilnehmerAnsicht, TeilnehmerAnsicht), AnrufFehler> {
    let ich = reg.abrufen(akteur).ok_or(AnrufFehler::NichtVerbunden)?;
    let partner_id = ich.partner.clone().ok_or(AnrufFehler::KeinPartner)?;
    let partner = reg.abrufen(&partner_id).ok_or(AnrufFehler::KeinPartner)?;
    if partner.partner.as_ref() != Some(akteur) {
        return Err(AnrufFehler::FalscherZustand);
    }
    Ok((ich, partner))
}
