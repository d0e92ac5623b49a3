//! Verbindungs-Sitzung – Verwaltet eine einzelne Client-Verbindung
//!
//! Jede Verbindung bekommt eine `Sitzung` in einem eigenen tokio-Task.
//! Die Sitzung ist vom konkreten Transport unabhaengig: eingehende Frames
//! kommen als `Eingang`-Stream, ausgehende JSON-Texte gehen in einen Sink.
//!
//! ## Ablauf
//! ```text
//! Token pruefen -> registered senden -> zulassen (Pending zustellen)
//!     -> Roster an alle -> Nachrichtenschleife -> trennen -> Roster an alle
//! ```
//!
//! Eingehende Nachrichten werden strikt nacheinander verarbeitet.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use klingel_db::BenutzerProfil;
use klingel_protocol::{ClientMessage, ErrorCode, ServerMessage};
use std::fmt;
use std::sync::Arc;

use crate::dispatcher::{MessageDispatcher, VerbindungsKontext};
use crate::error::{SignalingError, SignalingResult};
use crate::presence::{TransportEmpfaenger, TransportHandle};
use crate::server_state::{SignalingState, TrennGrund};

/// Ein eingehender Frame, unabhaengig vom Transport
#[derive(Debug, Clone, PartialEq)]
pub enum Eingang {
    /// JSON-Textframe
    Text(String),
    /// Binaerframe (nicht unterstuetzt)
    Binaer,
    /// Ping/Pong auf Transportebene
    Steuer,
    /// Client hat geschlossen
    Geschlossen,
    /// Lesefehler
    Fehler(String),
}

/// Prueft Token und Profil vor der Zulassung
///
/// Ein Fehler bedeutet: Verbindung sofort schliessen, kein Zustand.
pub async fn zulassung_pruefen(
    state: &SignalingState,
    token: &str,
) -> SignalingResult<BenutzerProfil> {
    if token.trim().is_empty() {
        return Err(SignalingError::TokenFehlt);
    }

    let user_id = state.kollaborateure.tokens.aufloesen(token).await?;
    match state.kollaborateure.profile.profil_laden(&user_id).await? {
        Some(profil) => Ok(profil),
        None => Err(SignalingError::ProfilFehlt(user_id)),
    }
}

/// Eine zugelassene Verbindung
pub struct Sitzung {
    state: Arc<SignalingState>,
    dispatcher: MessageDispatcher,
    ctx: VerbindungsKontext,
    transport: TransportHandle,
}

impl Sitzung {
    /// Laesst den Teilnehmer zu und sendet `registered`
    ///
    /// `registered` steht vor allen zurueckgehaltenen Signalen in der
    /// Sende-Queue. Danach erhalten alle Verbundenen den neuen Roster.
    pub async fn eroeffnen(
        state: Arc<SignalingState>,
        profil: BenutzerProfil,
        token: &str,
    ) -> (Self, TransportEmpfaenger) {
        let (transport, empfaenger) = TransportHandle::neu();
        let ctx = VerbindungsKontext {
            user_id: profil.id.clone(),
            verbindungs_id: transport.verbindungs_id(),
        };

        let online_users = state.roster_fuer(&profil.id).await;
        transport.senden(ServerMessage::Registered {
            user_id: profil.id.clone(),
            username: profil.username.clone(),
            avatar_url: profil.avatar_url.clone(),
            token: token.to_string(),
            online_users,
        });

        state.zulassen(profil, transport.clone());
        state.alle_aktualisieren().await;

        let sitzung = Self {
            dispatcher: MessageDispatcher::neu(Arc::clone(&state)),
            state,
            ctx,
            transport,
        };
        (sitzung, empfaenger)
    }

    pub fn kontext(&self) -> &VerbindungsKontext {
        &self.ctx
    }

    /// Verarbeitet einen eingehenden Textframe
    ///
    /// Jeder Frame zaehlt als Lebenszeichen. Ungueltige Nachrichten werden
    /// mit `error` beantwortet und aendern keinen Zustand.
    pub async fn text_verarbeiten(&self, text: &str) {
        self.lebenszeichen();

        let antwort = match ClientMessage::parsen(text) {
            Ok(nachricht) => self.dispatcher.dispatch(nachricht, &self.ctx).await,
            Err(fehler) => {
                tracing::warn!(user_id = %self.ctx.user_id, fehler = %fehler, "Ungueltige Nachricht");
                Some(ServerMessage::from(fehler))
            }
        };

        if let Some(antwort) = antwort {
            self.antworten(antwort);
        }
    }

    fn lebenszeichen(&self) {
        if !self.state.beruehren(&self.ctx.user_id, self.ctx.verbindungs_id) {
            tracing::trace!(
                user_id = %self.ctx.user_id,
                verbindung = %self.ctx.verbindungs_id,
                "Lebenszeichen einer veralteten Verbindung ignoriert"
            );
        }
    }

    fn antworten(&self, nachricht: ServerMessage) {
        if !self.transport.senden(nachricht) {
            tracing::debug!(user_id = %self.ctx.user_id, "Antwort verworfen, Verbindung geschlossen");
        }
    }

    /// Nachrichtenschleife bis der Transport endet
    ///
    /// Ungeschriebene WebRTC-Signale werden am Ende zurueckgehalten statt
    /// verworfen. Danach wird der Sink geschlossen und der Abbau
    /// durchgefuehrt. Gibt den Trennungsgrund zurueck.
    pub async fn betreiben<E, A>(
        self,
        mut empfaenger: TransportEmpfaenger,
        mut eingang: E,
        mut ausgang: A,
    ) -> TrennGrund
    where
        E: Stream<Item = Eingang> + Unpin,
        A: Sink<String> + Unpin,
        A::Error: fmt::Display,
    {
        tracing::info!(
            user_id = %self.ctx.user_id,
            verbindung = %self.ctx.verbindungs_id,
            "Sitzung gestartet"
        );

        // Nachricht, deren Schreiben fehlschlug
        let mut offen = None;

        let grund = loop {
            if *empfaenger.schliessen.borrow() {
                break TrennGrund::Server;
            }

            tokio::select! {
                biased;

                // Server schliesst (Verdraengung, Liveness, Shutdown)
                Ok(()) = empfaenger.schliessen.changed() => {
                    if *empfaenger.schliessen.borrow() {
                        break TrennGrund::Server;
                    }
                }

                // Ausgehende Nachricht aus der eigenen Queue
                ausgehend = empfaenger.nachrichten.recv() => {
                    let Some(nachricht) = ausgehend else {
                        break TrennGrund::SendeFehler;
                    };
                    let json = match nachricht.to_json() {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::error!(fehler = %e, typ = nachricht.typ_name(), "Serialisierung fehlgeschlagen");
                            continue;
                        }
                    };
                    if let Err(e) = ausgang.send(json).await {
                        tracing::warn!(user_id = %self.ctx.user_id, fehler = %e, "Senden fehlgeschlagen");
                        offen = Some(nachricht);
                        break TrennGrund::Transportfehler;
                    }
                }

                // Eingehender Frame vom Client
                frame = eingang.next() => {
                    match frame {
                        Some(Eingang::Text(text)) => self.text_verarbeiten(&text).await,
                        Some(Eingang::Binaer) => {
                            self.lebenszeichen();
                            tracing::warn!(user_id = %self.ctx.user_id, "Binaerframe ignoriert");
                            self.antworten(ServerMessage::error(
                                ErrorCode::InvalidJson,
                                "Nur JSON-Textframes werden unterstuetzt",
                            ));
                        }
                        Some(Eingang::Steuer) => self.lebenszeichen(),
                        Some(Eingang::Fehler(e)) => {
                            tracing::warn!(user_id = %self.ctx.user_id, fehler = %e, "Frame-Lesefehler");
                            break TrennGrund::Transportfehler;
                        }
                        Some(Eingang::Geschlossen) | None => break TrennGrund::Client,
                    }
                }
            }
        };

        self.state.signale_retten(
            &self.ctx.user_id,
            self.ctx.verbindungs_id,
            &mut empfaenger,
            offen,
        );

        if let Err(e) = ausgang.close().await {
            tracing::debug!(user_id = %self.ctx.user_id, fehler = %e, "Schliessen fehlgeschlagen");
        }
        self.beenden(grund).await;
        grund
    }

    /// Einziger Abbaupfad einer Sitzung
    ///
    /// Wurde die Verbindung bereits verdraengt oder entfernt, passiert nichts.
    pub async fn beenden(self, grund: TrennGrund) {
        let entfernt = self
            .state
            .trennen(&self.ctx.user_id, self.ctx.verbindungs_id, grund)
            .await;
        tracing::info!(
            user_id = %self.ctx.user_id,
            verbindung = %self.ctx.verbindungs_id,
            grund = ?grund,
            entfernt,
            "Sitzung beendet"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::test_hilfen::zustand_mit;
    use klingel_auth::SessionStore;
    use klingel_core::types::UserId;

    #[tokio::test]
    async fn leeres_token_wird_abgelehnt() {
        let (state, _db) = zustand_mit(&[("a", "Anna")]);
        let fehler = zulassung_pruefen(&state, "  ").await.unwrap_err();
        assert!(matches!(fehler, SignalingError::TokenFehlt));
        assert!(fehler.ist_zulassungsfehler());
    }

    #[tokio::test]
    async fn unbekanntes_token_wird_abgelehnt() {
        let (state, _db) = zustand_mit(&[("a", "Anna")]);
        let fehler = zulassung_pruefen(&state, "falsch").await.unwrap_err();
        assert!(matches!(fehler, SignalingError::Auth(_)));
        assert_eq!(state.verbundene_anzahl(), 0);
    }

    #[tokio::test]
    async fn eroeffnen_sendet_registered_zuerst() {
        let (state, _db) = zustand_mit(&[("a", "Anna"), ("b", "Bert")]);
        let (sitzung, mut rx) =
            Sitzung::eroeffnen(Arc::clone(&state), BenutzerProfil::neu("a", "Anna"), "tok").await;

        match rx.nachrichten.try_recv().unwrap() {
            ServerMessage::Registered {
                user_id,
                token,
                online_users,
                ..
            } => {
                assert_eq!(user_id, UserId::from("a"));
                assert_eq!(token, "tok");
                assert_eq!(online_users.len(), 1);
            }
            andere => panic!("registered erwartet, erhalten: {andere:?}"),
        }
        assert!(matches!(
            rx.nachrichten.try_recv().unwrap(),
            ServerMessage::UserList { .. }
        ));
        assert_eq!(sitzung.kontext().user_id, UserId::from("a"));
        assert!(state.teilnehmer(&UserId::from("a")).is_some());
    }

    #[tokio::test]
    async fn kaputtes_json_gibt_error() {
        let (state, _db) = zustand_mit(&[("a", "Anna")]);
        let (sitzung, mut rx) =
            Sitzung::eroeffnen(Arc::clone(&state), BenutzerProfil::neu("a", "Anna"), "tok").await;
        while rx.nachrichten.try_recv().is_ok() {}

        sitzung.text_verarbeiten("{kaputt").await;
        sitzung.text_verarbeiten(r#"{"type":"tanzen"}"#).await;

        let codes: Vec<ErrorCode> = std::iter::from_fn(|| rx.nachrichten.try_recv().ok())
            .filter_map(|n| match n {
                ServerMessage::Error { code, .. } => Some(code),
                _ => None,
            })
            .collect();
        assert_eq!(codes, vec![ErrorCode::InvalidJson, ErrorCode::UnknownType]);
        assert_eq!(
            state.teilnehmer(&UserId::from("a")).unwrap().status,
            klingel_protocol::UserStatus::Available
        );
    }

    #[tokio::test]
    async fn registriertes_token_wird_aufgeloest() {
        let db = klingel_db::MemoryDb::neu();
        db.benutzer_anlegen(BenutzerProfil::neu("a", "Anna")).unwrap();
        let tokens = SessionStore::neu();
        tokens
            .token_registrieren("geheim", UserId::from("a"))
            .await
            .unwrap();
        let state = SignalingState::neu(
            crate::server_state::SignalingConfig::default(),
            crate::server_state::Kollaborateure::mit_datenbank(tokens, Arc::new(db)),
            klingel_observability::KlingelMetrics::neu().unwrap(),
            klingel_observability::HealthState::neu(),
        );

        let profil = zulassung_pruefen(&state, "geheim").await.unwrap();
        assert_eq!(profil.username, "Anna");
    }
}
