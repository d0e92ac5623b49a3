//! Roster-Berechnung
//!
//! Projektion aller bekannten Identitaeten mit Live-Status der verbundenen
//! Teilnehmer. Verbundene zuerst, dann nach Name ohne Gross-/Kleinschreibung.

use klingel_core::types::UserId;
use klingel_db::BenutzerProfil;
use klingel_protocol::{RosterEntry, UserStatus};
use std::collections::HashMap;

use crate::presence::TeilnehmerAnsicht;

/// Palette fuer Avatar-Hintergruende
pub const AVATAR_FARBEN: [&str; 10] = [
    "#0088cc", "#00a884", "#ff6b6b", "#51cf66", "#ffd43b", "#20c997", "#be4bdb", "#f76707",
    "#339af0", "#ff8787",
];

/// Deterministische Avatar-Farbe: Summe der Codepoints modulo Palettengroesse
pub fn avatar_farbe(id: &UserId) -> &'static str {
    let summe: u64 = id.as_str().chars().map(|c| c as u64).sum();
    AVATAR_FARBEN[(summe % AVATAR_FARBEN.len() as u64) as usize]
}

/// Baut den Roster aus Sicht von `fuer` (ohne `fuer` selbst)
///
/// Verbundene Teilnehmer, die der Roster-Quelle unbekannt sind, erscheinen
/// trotzdem.
pub fn roster_erstellen(
    bekannte: &[BenutzerProfil],
    live: &[TeilnehmerAnsicht],
    fuer: Option<&UserId>,
) -> Vec<RosterEntry> {
    let mut live_nach_id: HashMap<&UserId, &TeilnehmerAnsicht> =
        live.iter().map(|t| (&t.id, t)).collect();

    let mut eintraege: Vec<RosterEntry> = Vec::with_capacity(bekannte.len() + live.len());

    for profil in bekannte {
        if Some(&profil.id) == fuer {
            live_nach_id.remove(&profil.id);
            continue;
        }
        let eintrag = match live_nach_id.remove(&profil.id) {
            Some(t) => live_eintrag(t),
            None => RosterEntry {
                id: profil.id.clone(),
                username: profil.username.clone(),
                avatar_url: profil.avatar_url.clone(),
                avatar_color: avatar_farbe(&profil.id).to_string(),
                online: false,
                status: UserStatus::Offline,
            },
        };
        eintraege.push(eintrag);
    }

    eintraege.extend(
        live_nach_id
            .into_values()
            .filter(|t| Some(&t.id) != fuer)
            .map(live_eintrag),
    );

    eintraege.sort_by(|a, b| {
        b.online
            .cmp(&a.online)
            .then_with(|| a.username.to_lowercase().cmp(&b.username.to_lowercase()))
            .then_with(|| a.id.cmp(&b.id))
    });
    eintraege
}

fn live_eintrag(t: &TeilnehmerAnsicht) -> RosterEntry {
    RosterEntry {
        id: t.id.clone(),
        username: t.username.clone(),
        avatar_url: t.avatar_url.clone(),
        avatar_color: avatar_farbe(&t.id).to_string(),
        online: true,
        status: t.status,
    }
}
