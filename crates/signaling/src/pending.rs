//! Pending-Queue – Signale fuer momentan unerreichbare Teilnehmer
//!
//! Pro Ziel eine FIFO-Warteschlange. Sie wird bei der naechsten Zulassung
//! des Ziels vollstaendig und in Reihenfolge zugestellt und danach geleert.

use klingel_core::types::UserId;
use klingel_protocol::ServerMessage;
use std::collections::{HashMap, VecDeque};

/// Ein zurueckgehaltenes WebRTC-Signal
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSignal {
    pub absender: UserId,
    pub ziel: UserId,
    pub signal: serde_json::Value,
}

impl PendingSignal {
    /// Nachricht wie sie live zugestellt worden waere
    pub fn in_nachricht(self) -> ServerMessage {
        ServerMessage::WebrtcSignal {
            signal: self.signal,
            sender_id: self.absender,
        }
    }
}

/// Warteschlangen aller Ziele
#[derive(Debug, Default)]
pub struct PendingQueue {
    warteschlangen: HashMap<UserId, VecDeque<PendingSignal>>,
    /// Maximale Laenge pro Ziel (None = unbegrenzt)
    obergrenze: Option<usize>,
}

impl PendingQueue {
    pub fn neu(obergrenze: Option<usize>) -> Self {
        Self {
            warteschlangen: HashMap::new(),
            obergrenze: obergrenze.filter(|n| *n > 0),
        }
    }

    /// Reiht ein Signal ein
    ///
    /// Bei ueberschrittener Obergrenze wird das aelteste Signal verworfen
    /// und zurueckgegeben.
    pub fn einreihen(&mut self, signal: PendingSignal) -> Option<PendingSignal> {
        let schlange = self.warteschlangen.entry(signal.ziel.clone()).or_default();
        schlange.push_back(signal);

        match self.obergrenze {
            Some(max) if schlange.len() > max => {
                let verworfen = schlange.pop_front();
                if let Some(v) = &verworfen {
                    tracing::warn!(
                        ziel = %v.ziel,
                        absender = %v.absender,
                        obergrenze = max,
                        "Pending-Queue voll – aeltestes Signal verworfen"
                    );
                }
                verworfen
            }
            _ => None,
        }
    }

    /// Stellt Signale vor alle bereits wartenden, Reihenfolge bleibt erhalten
    ///
    /// Fuer Signale, die schon unterwegs waren und deshalb aelter sind als
    /// alles, was danach eingereiht wurde. Bei ueberschrittener Obergrenze
    /// werden die aeltesten verworfen. Gibt die Anzahl verworfener Signale
    /// zurueck.
    pub fn voranstellen(&mut self, ziel: &UserId, signale: Vec<PendingSignal>) -> usize {
        if signale.is_empty() {
            return 0;
        }
        let schlange = self.warteschlangen.entry(ziel.clone()).or_default();
        for signal in signale.into_iter().rev() {
            schlange.push_front(signal);
        }

        let mut verworfen = 0;
        if let Some(max) = self.obergrenze {
            while schlange.len() > max {
                schlange.pop_front();
                verworfen += 1;
            }
            if verworfen > 0 {
                tracing::warn!(
                    ziel = %ziel,
                    anzahl = verworfen,
                    obergrenze = max,
                    "Pending-Queue voll – aelteste Signale verworfen"
                );
            }
        }
        verworfen
    }

    /// Entnimmt alle Signale fuer `id` in Einreihungsreihenfolge
    pub fn abholen(&mut self, id: &UserId) -> Vec<PendingSignal> {
        self.warteschlangen
            .remove(id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn anzahl(&self, id: &UserId) -> usize {
        self.warteschlangen.get(id).map_or(0, VecDeque::len)
    }

    pub fn gesamt(&self) -> usize {
        self.warteschlangen.values().map(VecDeque::len).sum()
    }
}
