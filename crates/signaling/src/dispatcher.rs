//! Message-Dispatcher – Routet Client-Nachrichten an die richtigen Handler
//!
//! Der Dispatcher empfaengt bereits geparste `ClientMessage`s einer
//! Sitzung, bestimmt den Handler und gibt die optionale Antwort an den
//! Absender zurueck. Benachrichtigungen an andere Teilnehmer verschicken
//! die Handler selbst.

use klingel_core::types::UserId;
use klingel_protocol::{ClientMessage, ServerMessage};
use std::sync::Arc;

use crate::handlers::{call_handler, roster_handler, signal_handler};
use crate::presence::VerbindungsId;
use crate::server_state::SignalingState;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
#[derive(Debug, Clone)]
pub struct VerbindungsKontext {
    /// Zugelassene Teilnehmer-ID
    pub user_id: UserId,
    /// Verbindung, ueber die die Nachricht kam
    pub verbindungs_id: VerbindungsId,
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: Arc<SignalingState>,
}

impl MessageDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Verarbeitet eine Client-Nachricht und gibt die Antwort zurueck
    ///
    /// Gibt `None` zurueck wenn der Absender keine direkte Antwort erhaelt.
    /// Nachrichten einer bereits verdraengten Verbindung werden verworfen.
    pub async fn dispatch(
        &self,
        nachricht: ClientMessage,
        ctx: &VerbindungsKontext,
    ) -> Option<ServerMessage> {
        if !self.ist_aktuell(ctx) {
            tracing::debug!(
                user_id = %ctx.user_id,
                verbindung = %ctx.verbindungs_id,
                typ = nachricht.typ_name(),
                "Nachricht einer veralteten Verbindung verworfen"
            );
            return None;
        }

        tracing::trace!(user_id = %ctx.user_id, typ = nachricht.typ_name(), "Nachricht");

        let state = &self.state;
        match nachricht {
            ClientMessage::Heartbeat => Some(ServerMessage::HeartbeatAck),

            ClientMessage::GetUsers => roster_handler::handle_get_users(ctx, state).await,

            ClientMessage::CallRequest { target_id } => {
                call_handler::handle_call_request(target_id, ctx, state).await
            }

            ClientMessage::CallAccept => call_handler::handle_call_accept(ctx, state).await,

            ClientMessage::CallDecline => call_handler::handle_call_decline(ctx, state).await,

            ClientMessage::CallEnd => call_handler::handle_call_end(ctx, state).await,

            ClientMessage::WebrtcSignal { target_id, signal } => {
                signal_handler::handle_webrtc_signal(target_id, signal, ctx, state).await
            }

            ClientMessage::ProfileUpdated => {
                roster_handler::handle_profile_updated(ctx, state).await
            }

            ClientMessage::GetCallHistory { limit } => {
                roster_handler::handle_get_call_history(limit, ctx, state).await
            }
        }
    }

    fn ist_aktuell(&self, ctx: &VerbindungsKontext) -> bool {
        self.state
            .zustand
            .lock()
            .presence
            .abrufen(&ctx.user_id)
            .is_some_and(|t| t.verbindungs_id == ctx.verbindungs_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::TransportHandle;
    use crate::server_state::test_hilfen::zustand_mit;
    use klingel_db::BenutzerProfil;

    #[tokio::test]
    async fn heartbeat_wird_bestaetigt() {
        let (state, _db) = zustand_mit(&[("a", "Anna")]);
        let (handle, rx) = TransportHandle::neu();
        state.zulassen(BenutzerProfil::neu("a", "Anna"), handle);
        let ctx = VerbindungsKontext {
            user_id: UserId::from("a"),
            verbindungs_id: rx.verbindungs_id,
        };

        let dispatcher = MessageDispatcher::neu(Arc::clone(&state));
        assert_eq!(
            dispatcher.dispatch(ClientMessage::Heartbeat, &ctx).await,
            Some(ServerMessage::HeartbeatAck)
        );
    }

    #[tokio::test]
    async fn veraltete_verbindung_wird_ignoriert() {
        let (state, _db) = zustand_mit(&[("a", "Anna"), ("b", "Bert")]);
        let (alt, alt_rx) = TransportHandle::neu();
        state.zulassen(BenutzerProfil::neu("a", "Anna"), alt);
        let (neu, _neu_rx) = TransportHandle::neu();
        state.zulassen(BenutzerProfil::neu("a", "Anna"), neu);
        let (hb, _rx_b) = TransportHandle::neu();
        state.zulassen(BenutzerProfil::neu("b", "Bert"), hb);

        let veraltet = VerbindungsKontext {
            user_id: UserId::from("a"),
            verbindungs_id: alt_rx.verbindungs_id,
        };
        let dispatcher = MessageDispatcher::neu(Arc::clone(&state));
        let antwort = dispatcher
            .dispatch(
                ClientMessage::CallRequest {
                    target_id: UserId::from("b"),
                },
                &veraltet,
            )
            .await;

        assert!(antwort.is_none());
        assert_eq!(
            state.teilnehmer(&UserId::from("b")).unwrap().status,
            klingel_protocol::UserStatus::Available
        );
    }
}
