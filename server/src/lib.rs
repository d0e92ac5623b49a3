//! klingel-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;

use anyhow::Result;
use axum::Router;
use config::ServerConfig;
use klingel_auth::SessionStore;
use klingel_core::{KlingelError, UserId};
use klingel_db::MemoryDb;
use klingel_observability::{
    observability_router, request_timing_layer, timing_middleware, HealthState, KlingelMetrics,
};
use klingel_signaling::{ueberwachung_starten, Kollaborateure, SignalingState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    pub state: Arc<SignalingState>,
    router: Router,
}

impl Server {
    /// Baut Datenbank, Token-Store und Signaling-Zustand aus der Konfiguration
    ///
    /// Muss innerhalb einer tokio-Runtime aufgerufen werden.
    pub async fn neu(config: ServerConfig) -> Result<Self> {
        config.validieren()?;

        let db = MemoryDb::neu();
        let tokens = SessionStore::neu();
        for eintrag in &config.benutzer {
            db.benutzer_anlegen(eintrag.profil()).map_err(KlingelError::from)?;
            tokens
                .token_registrieren(&eintrag.token, UserId::from(eintrag.id.as_str()))
                .await
                .map_err(|e| KlingelError::Konfiguration(format!("Benutzer '{}': {e}", eintrag.id)))?;
        }
        let token_anzahl = tokens.anzahl().await;
        tracing::info!(
            benutzer = db.benutzer_anzahl(),
            tokens = token_anzahl,
            "Bekannte Identitaeten geladen"
        );

        let metriken = KlingelMetrics::neu()?;
        let health = HealthState::neu();
        let state = SignalingState::neu(
            config.signaling.als_signaling_config(),
            Kollaborateure::mit_datenbank(tokens, Arc::new(db)),
            metriken.clone(),
            health.clone(),
        );

        let mut router = klingel_signaling::router(Arc::clone(&state));
        if config.observability.aktiviert {
            router = router.merge(observability_router(metriken, health));
        }
        let router = router
            .layer(axum::middleware::from_fn(timing_middleware))
            .layer(request_timing_layer());

        Ok(Self {
            config,
            state,
            router,
        })
    }

    /// HTTP-Router mit allen Endpunkten
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Liveness-Ueberwachung starten
    /// 2. HTTP/WebSocket-Listener binden
    /// 3. Auf Ctrl-C warten
    /// 4. Alle Verbindungen schliessen
    pub async fn starten(self) -> Result<()> {
        let adresse: SocketAddr = self
            .config
            .bind_adresse()
            .parse()
            .map_err(|e| KlingelError::Konfiguration(format!("Bind-Adresse: {e}")))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ueberwachung = ueberwachung_starten(Arc::clone(&self.state), shutdown_rx);

        let listener = tokio::net::TcpListener::bind(adresse).await?;
        tracing::info!(
            server_name = %self.config.server.name,
            adresse = %adresse,
            "Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)..."
        );

        let state = Arc::clone(&self.state);
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(fehler = %e, "Ctrl-C-Handler konnte nicht installiert werden");
                }
                tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
                let geschlossen = state.herunterfahren();
                tracing::info!(verbindungen = geschlossen, "Verbindungen geschlossen");
            })
            .await?;

        let _ = shutdown_tx.send(true);
        if let Err(e) = ueberwachung.await {
            tracing::warn!(fehler = %e, "Liveness-Ueberwachung nicht sauber beendet");
        }

        tracing::info!("Server beendet");
        Ok(())
    }
}
