//! Anruf-Handler – CallRequest, CallAccept, CallDecline, CallEnd
//!
//! Zustandsuebergaenge der Anruf-Zustandsmaschine. Nur eine abgelehnte
//! Anfrage wird dem Absender beantwortet (`call_error`); verletzte
//! Bedingungen bei Annahme, Ablehnung und Beenden werden nur geloggt.

use klingel_core::types::UserId;
use klingel_protocol::ServerMessage;
use std::sync::Arc;

use crate::calls::Zeitpunkt;
use crate::dispatcher::VerbindungsKontext;
use crate::handlers::partner_benachrichtigen;
use crate::roster::avatar_farbe;
use crate::server_state::SignalingState;

/// Text der `call_declined`-Nachricht
pub const ABGELEHNT_TEXT: &str = "Anruf abgelehnt";
/// Text der `call_ended`-Nachricht
pub const BEENDET_TEXT: &str = "Anruf beendet";

/// Verarbeitet eine Anruf-Anfrage
pub async fn handle_call_request(
    ziel: UserId,
    ctx: &VerbindungsKontext,
    state: &Arc<SignalingState>,
) -> Option<ServerMessage> {
    let ergebnis = {
        let mut guard = state.zustand.lock();
        let z = &mut *guard;
        z.anrufe.anfragen(&mut z.presence, &ctx.user_id, &ziel)
    };

    let anfrage = match ergebnis {
        Ok(a) => a,
        Err(fehler) => {
            tracing::warn!(
                user_id = %ctx.user_id,
                ziel = %ziel,
                fehler = %fehler,
                "Anruf-Anfrage abgelehnt"
            );
            return Some(ServerMessage::call_error(fehler.to_string()));
        }
    };

    tracing::info!(anrufer = %ctx.user_id, ziel = %ziel, "Anruf angefragt");

    let anrufer = anfrage.anrufer;
    let caller_avatar = anrufer
        .avatar_url
        .clone()
        .unwrap_or_else(|| avatar_farbe(&anrufer.id).to_string());
    partner_benachrichtigen(
        state,
        &ziel,
        &anfrage.ziel_transport,
        ServerMessage::IncomingCall {
            caller_id: anrufer.id,
            caller_name: anrufer.username,
            caller_avatar,
        },
    );

    state.alle_aktualisieren().await;
    None
}

/// Verarbeitet die Annahme durch den Angerufenen
pub async fn handle_call_accept(
    ctx: &VerbindungsKontext,
    state: &Arc<SignalingState>,
) -> Option<ServerMessage> {
    let ergebnis = {
        let mut guard = state.zustand.lock();
        let z = &mut *guard;
        let r = z
            .anrufe
            .annehmen(&mut z.presence, &ctx.user_id, Zeitpunkt::jetzt());
        state.gauges_aktualisieren(z);
        r
    };

    let annahme = match ergebnis {
        Ok(a) => a,
        Err(fehler) => {
            tracing::warn!(user_id = %ctx.user_id, fehler = %fehler, "Annahme ignoriert");
            return None;
        }
    };

    state.metriken.anruf_zaehlen("accepted");
    tracing::info!(
        call_id = %annahme.call_id,
        anrufer = %annahme.anrufer,
        angerufener = %ctx.user_id,
        "Anruf angenommen"
    );

    partner_benachrichtigen(
        state,
        &annahme.anrufer,
        &annahme.anrufer_transport,
        ServerMessage::CallAccepted {
            callee_id: ctx.user_id.clone(),
            callee_name: annahme.angerufener_name,
        },
    );

    state.alle_aktualisieren().await;
    None
}

/// Verarbeitet eine Ablehnung (Angerufener) oder Rueckzug (Anrufer)
pub async fn handle_call_decline(
    ctx: &VerbindungsKontext,
    state: &Arc<SignalingState>,
) -> Option<ServerMessage> {
    let ergebnis = {
        let mut guard = state.zustand.lock();
        let z = &mut *guard;
        z.anrufe.ablehnen(&mut z.presence, &ctx.user_id)
    };

    let aufloesung = match ergebnis {
        Ok(a) => a,
        Err(fehler) => {
            tracing::warn!(user_id = %ctx.user_id, fehler = %fehler, "Ablehnung ignoriert");
            return None;
        }
    };

    state.metriken.anruf_zaehlen("declined");
    tracing::info!(user_id = %ctx.user_id, partner = %aufloesung.partner, "Anruf abgelehnt");

    partner_benachrichtigen(
        state,
        &aufloesung.partner,
        &aufloesung.partner_transport,
        ServerMessage::CallDeclined {
            message: ABGELEHNT_TEXT.to_string(),
        },
    );

    state.alle_aktualisieren().await;
    None
}

/// Beendet ein Gespraech oder legt waehrend des Klingelns auf
pub async fn handle_call_end(
    ctx: &VerbindungsKontext,
    state: &Arc<SignalingState>,
) -> Option<ServerMessage> {
    let ergebnis = {
        let mut guard = state.zustand.lock();
        let z = &mut *guard;
        let r = z
            .anrufe
            .beenden(&mut z.presence, &ctx.user_id, Zeitpunkt::jetzt());
        state.gauges_aktualisieren(z);
        r
    };

    let aufloesung = match ergebnis {
        Ok(a) => a,
        Err(fehler) => {
            tracing::warn!(user_id = %ctx.user_id, fehler = %fehler, "Beenden ignoriert");
            return None;
        }
    };

    partner_benachrichtigen(
        state,
        &aufloesung.partner,
        &aufloesung.partner_transport,
        ServerMessage::CallEnded {
            message: BEENDET_TEXT.to_string(),
        },
    );

    match aufloesung.datensatz {
        Some(datensatz) => {
            tracing::info!(
                call_id = %datensatz.call_id,
                user_id = %ctx.user_id,
                dauer_sek = datensatz.dauer_sek,
                "Gespraech beendet"
            );
            state.protokollieren(datensatz);
        }
        None => {
            tracing::info!(user_id = %ctx.user_id, partner = %aufloesung.partner, "Klingeln beendet");
        }
    }

    state.alle_aktualisieren().await;
    None
}
