//! Roster-Handler – GetUsers, ProfileUpdated, GetCallHistory

use klingel_db::VERLAUF_STANDARD_LIMIT;
use klingel_protocol::{CallRecordInfo, ErrorCode, ServerMessage};
use std::sync::Arc;

use crate::dispatcher::VerbindungsKontext;
use crate::server_state::SignalingState;

/// Liefert den aktuellen Roster an den Anfragenden
pub async fn handle_get_users(
    ctx: &VerbindungsKontext,
    state: &Arc<SignalingState>,
) -> Option<ServerMessage> {
    let users = state.roster_fuer(&ctx.user_id).await;
    Some(ServerMessage::UserList { users })
}

/// Laedt das Profil neu und verteilt den Roster an alle
///
/// Schlaegt das Nachladen fehl, wird trotzdem verteilt.
pub async fn handle_profile_updated(
    ctx: &VerbindungsKontext,
    state: &Arc<SignalingState>,
) -> Option<ServerMessage> {
    match state.kollaborateure.profile.profil_laden(&ctx.user_id).await {
        Ok(Some(profil)) => {
            if state.zustand.lock().presence.profil_aktualisieren(profil) {
                tracing::info!(user_id = %ctx.user_id, "Profil aktualisiert");
            }
        }
        Ok(None) => {
            tracing::warn!(user_id = %ctx.user_id, "Profil nicht mehr vorhanden");
        }
        Err(e) => {
            tracing::warn!(user_id = %ctx.user_id, fehler = %e, "Profil konnte nicht geladen werden");
        }
    }

    state.alle_aktualisieren().await;
    None
}

/// Liefert den Anrufverlauf des Anfragenden, neueste zuerst
pub async fn handle_get_call_history(
    limit: Option<u32>,
    ctx: &VerbindungsKontext,
    state: &Arc<SignalingState>,
) -> Option<ServerMessage> {
    let limit = limit
        .map(|l| l as usize)
        .unwrap_or(VERLAUF_STANDARD_LIMIT)
        .min(state.config.verlauf_max_limit);

    match state
        .kollaborateure
        .anrufprotokoll
        .verlauf(&ctx.user_id, limit)
        .await
    {
        Ok(datensaetze) => {
            let calls = datensaetze
                .into_iter()
                .map(|d| CallRecordInfo {
                    call_id: d.call_id,
                    caller_id: d.anrufer,
                    callee_id: d.angerufener,
                    started_at: d.beginn,
                    ended_at: d.ende,
                    duration_secs: d.dauer_sek,
                    call_type: d.typ.als_str().to_string(),
                })
                .collect();
            Some(ServerMessage::CallHistory { calls })
        }
        Err(e) => {
            tracing::error!(user_id = %ctx.user_id, fehler = %e, "Anrufverlauf nicht verfuegbar");
            Some(ServerMessage::error(
                ErrorCode::InternalError,
                "Anrufverlauf nicht verfuegbar",
            ))
        }
    }
}
