//! WebSocket-Endpunkt und Status-Abfrage
//!
//! Endpunkte:
//! - `GET /ws?token=...` – WebSocket-Upgrade in eine Sitzung
//! - `GET /status` – JSON mit Teilnehmerzahlen
//!
//! Das Token wird vor dem Upgrade geprueft. Ohne gueltiges Token kommt es
//! nie zu einer Verbindung und es entsteht kein Zustand.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use klingel_db::BenutzerProfil;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::connection::{zulassung_pruefen, Eingang, Sitzung};
use crate::server_state::SignalingState;

/// Query-Parameter des WebSocket-Endpunkts
#[derive(Debug, Deserialize)]
pub struct WsParameter {
    #[serde(default)]
    pub token: Option<String>,
}

/// Antwort von `GET /status`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusAntwort {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// Anzahl bekannter Identitaeten
    pub total_users: usize,
    /// Anzahl verbundener Teilnehmer
    pub online_users: usize,
    pub active_calls: usize,
}

/// Axum-Router fuer `/ws` und `/status`
pub fn router(state: Arc<SignalingState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// `GET /ws` – prueft das Token und startet die Sitzung
async fn ws_handler(
    State(state): State<Arc<SignalingState>>,
    Query(parameter): Query<WsParameter>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let token = parameter.token.unwrap_or_default();

    let profil = match zulassung_pruefen(&state, &token).await {
        Ok(p) => p,
        Err(e) if e.ist_zulassungsfehler() => {
            tracing::warn!(fehler = %e, "Zulassung verweigert");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
        Err(e) => {
            tracing::error!(fehler = %e, "Zulassung nicht moeglich");
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };

    let Some(upgrade) = upgrade else {
        return (StatusCode::UPGRADE_REQUIRED, "WebSocket-Upgrade erforderlich").into_response();
    };

    upgrade.on_upgrade(move |socket| sitzung_betreiben(state, profil, token, socket))
}

async fn sitzung_betreiben(
    state: Arc<SignalingState>,
    profil: BenutzerProfil,
    token: String,
    socket: WebSocket,
) {
    let (sink, stream) = socket.split();

    let eingang = stream.map(|frame| match frame {
        Ok(Message::Text(text)) => Eingang::Text(text),
        Ok(Message::Binary(_)) => Eingang::Binaer,
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Eingang::Steuer,
        Ok(Message::Close(_)) => Eingang::Geschlossen,
        Err(e) => Eingang::Fehler(e.to_string()),
    });
    let ausgang =
        sink.with(|text: String| async move { Ok::<_, axum::Error>(Message::Text(text)) });

    let (sitzung, empfaenger) = Sitzung::eroeffnen(state, profil, &token).await;
    sitzung
        .betreiben(empfaenger, Box::pin(eingang), Box::pin(ausgang))
        .await;
}

/// `GET /status` – Teilnehmerzahlen und laufende Gespraeche
async fn status_handler(State(state): State<Arc<SignalingState>>) -> impl IntoResponse {
    let bekannte = match state.kollaborateure.roster.alle_benutzer().await {
        Ok(alle) => alle,
        Err(e) => {
            tracing::warn!(fehler = %e, "Roster-Quelle nicht verfuegbar");
            Vec::new()
        }
    };
    let (online_users, active_calls) = {
        let z = state.zustand.lock();
        (z.presence.anzahl(), z.anrufe.anzahl())
    };

    Json(StatusAntwort {
        status: "online".to_string(),
        timestamp: Utc::now(),
        total_users: bekannte.len(),
        online_users,
        active_calls,
    })
}
