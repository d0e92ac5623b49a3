//! Signal-Handler – WebrtcSignal
//!
//! Leitet opake WebRTC-Aushandlungsinhalte an das Ziel weiter. Ist das
//! Ziel nicht verbunden oder seine Sende-Queue geschlossen, wird das Signal
//! fuer die naechste Zulassung zurueckgehalten. Nachschlagen, Senden und
//! Einreihen geschehen unter demselben Lock wie die Zulassung, dadurch kann
//! kein Live-Signal ein zurueckgehaltenes ueberholen.

use klingel_core::types::UserId;
use klingel_protocol::ServerMessage;
use std::sync::Arc;

use crate::dispatcher::VerbindungsKontext;
use crate::pending::PendingSignal;
use crate::presence::VerbindungsId;
use crate::server_state::{SignalingState, TrennGrund};

enum Zustellweg {
    Live,
    /// Ziel nicht verbunden
    Eingereiht,
    /// Ziel verbunden, aber Sende-Queue geschlossen
    EingereihtNachFehler(VerbindungsId),
}

/// Verarbeitet ein WebRTC-Signal
pub async fn handle_webrtc_signal(
    ziel: UserId,
    signal: serde_json::Value,
    ctx: &VerbindungsKontext,
    state: &Arc<SignalingState>,
) -> Option<ServerMessage> {
    let weg = {
        let mut z = state.zustand.lock();
        let transport = z.presence.transport(&ziel);
        let live = transport.as_ref().is_some_and(|t| {
            t.senden(ServerMessage::WebrtcSignal {
                signal: signal.clone(),
                sender_id: ctx.user_id.clone(),
            })
        });

        if live {
            Zustellweg::Live
        } else {
            z.pending.einreihen(PendingSignal {
                absender: ctx.user_id.clone(),
                ziel: ziel.clone(),
                signal,
            });
            match transport {
                Some(t) => Zustellweg::EingereihtNachFehler(t.verbindungs_id()),
                None => Zustellweg::Eingereiht,
            }
        }
    };

    match weg {
        Zustellweg::Live => {
            state.metriken.signal_zaehlen("live");
            tracing::debug!(absender = %ctx.user_id, ziel = %ziel, "Signal weitergeleitet");
        }
        Zustellweg::Eingereiht => {
            state.metriken.signal_zaehlen("queued");
            tracing::debug!(absender = %ctx.user_id, ziel = %ziel, "Ziel nicht verbunden, Signal zurueckgehalten");
        }
        Zustellweg::EingereihtNachFehler(verbindung) => {
            state.metriken.signal_zaehlen("queued");
            tracing::warn!(
                absender = %ctx.user_id,
                ziel = %ziel,
                "Zustellung fehlgeschlagen, Signal zurueckgehalten"
            );
            state.trennen(&ziel, verbindung, TrennGrund::SendeFehler).await;
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::TransportHandle;
    use crate::server_state::test_hilfen::zustand_mit;
    use klingel_db::BenutzerProfil;
    use serde_json::json;

    fn kontext(id: &str, verbindungs_id: VerbindungsId) -> VerbindungsKontext {
        VerbindungsKontext {
            user_id: UserId::from(id),
            verbindungs_id,
        }
    }

    #[tokio::test]
    async fn live_zustellung_unveraendert() {
        let (state, _db) = zustand_mit(&[("a", "Anna"), ("b", "Bert")]);
        let (ha, rx_a) = TransportHandle::neu();
        let (hb, mut rx_b) = TransportHandle::neu();
        state.zulassen(BenutzerProfil::neu("a", "Anna"), ha);
        state.zulassen(BenutzerProfil::neu("b", "Bert"), hb);

        let signal = json!({"type": "offer", "sdp": "v=0\r\n"});
        handle_webrtc_signal(
            UserId::from("b"),
            signal.clone(),
            &kontext("a", rx_a.verbindungs_id),
            &state,
        )
        .await;

        assert_eq!(
            rx_b.nachrichten.try_recv().unwrap(),
            ServerMessage::WebrtcSignal {
                signal,
                sender_id: UserId::from("a"),
            }
        );
        assert_eq!(state.metriken.signals_total.with_label_values(&["live"]).get(), 1);
    }

    #[tokio::test]
    async fn abwesendes_ziel_wird_eingereiht() {
        let (state, _db) = zustand_mit(&[("a", "Anna"), ("b", "Bert")]);
        let (ha, rx_a) = TransportHandle::neu();
        state.zulassen(BenutzerProfil::neu("a", "Anna"), ha);

        for i in 0..3 {
            handle_webrtc_signal(
                UserId::from("b"),
                json!({"candidate": i}),
                &kontext("a", rx_a.verbindungs_id),
                &state,
            )
            .await;
        }
        assert_eq!(state.pending_anzahl(&UserId::from("b")), 3);
        assert_eq!(state.metriken.signals_total.with_label_values(&["queued"]).get(), 3);
    }

    #[tokio::test]
    async fn geschlossene_queue_reiht_ein_und_trennt() {
        let (state, _db) = zustand_mit(&[("a", "Anna"), ("b", "Bert")]);
        let (ha, rx_a) = TransportHandle::neu();
        let (hb, rx_b) = TransportHandle::neu();
        state.zulassen(BenutzerProfil::neu("a", "Anna"), ha);
        state.zulassen(BenutzerProfil::neu("b", "Bert"), hb);
        drop(rx_b);

        handle_webrtc_signal(
            UserId::from("b"),
            json!({"candidate": "x"}),
            &kontext("a", rx_a.verbindungs_id),
            &state,
        )
        .await;

        assert_eq!(state.pending_anzahl(&UserId::from("b")), 1);
        assert!(state.teilnehmer(&UserId::from("b")).is_none());
        assert_eq!(
            state.metriken.evictions_total.with_label_values(&["send_failure"]).get(),
            1
        );
    }
}
