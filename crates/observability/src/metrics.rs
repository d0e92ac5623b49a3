//! Prometheus-kompatible Metriken fuer Klingel
//!
//! Registrierte Metriken:
//! - `klingel_connected_participants` – Gauge: Aktuell verbundene Teilnehmer
//! - `klingel_active_calls` – Gauge: Laufende Gespraeche
//! - `klingel_calls_total{ausgang}` – Counter: accepted / declined / completed
//! - `klingel_signals_total{weg}` – Counter: live / queued / delivered_pending / requeued
//! - `klingel_evictions_total{grund}` – Counter: liveness / send_failure / superseded

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Klingel-Prometheus-Metriken
///
/// Clone teilt die Registry und alle Collector-Handles.
#[derive(Clone)]
pub struct KlingelMetrics {
    pub registry: Arc<Registry>,

    // Presence
    pub connected_participants: IntGauge,
    pub evictions_total: IntCounterVec,

    // Gespraeche
    pub active_calls: IntGauge,
    pub calls_total: IntCounterVec,

    // Relay
    pub signals_total: IntCounterVec,
}

impl KlingelMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_participants = IntGauge::with_opts(Opts::new(
            "klingel_connected_participants",
            "Anzahl aktuell verbundener Teilnehmer",
        ))?;
        registry.register(Box::new(connected_participants.clone()))?;

        let evictions_total = IntCounterVec::new(
            Opts::new(
                "klingel_evictions_total",
                "Zwangsweise entfernte Teilnehmer",
            ),
            &["grund"],
        )?;
        registry.register(Box::new(evictions_total.clone()))?;

        let active_calls = IntGauge::with_opts(Opts::new(
            "klingel_active_calls",
            "Anzahl laufender Gespraeche",
        ))?;
        registry.register(Box::new(active_calls.clone()))?;

        let calls_total = IntCounterVec::new(
            Opts::new("klingel_calls_total", "Anrufe nach Ausgang"),
            &["ausgang"],
        )?;
        registry.register(Box::new(calls_total.clone()))?;

        let signals_total = IntCounterVec::new(
            Opts::new(
                "klingel_signals_total",
                "Weitergeleitete WebRTC-Signale nach Zustellweg",
            ),
            &["weg"],
        )?;
        registry.register(Box::new(signals_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_participants,
            evictions_total,
            active_calls,
            calls_total,
            signals_total,
        })
    }

    /// Zaehlt einen Anruf mit dem angegebenen Ausgang
    pub fn anruf_zaehlen(&self, ausgang: &str) {
        self.calls_total.with_label_values(&[ausgang]).inc();
    }

    /// Zaehlt ein Signal mit dem angegebenen Zustellweg
    pub fn signal_zaehlen(&self, weg: &str) {
        self.signals_total.with_label_values(&[weg]).inc();
    }

    /// Zaehlt eine Zwangsentfernung
    pub fn entfernung_zaehlen(&self, grund: &str) {
        self.evictions_total.with_label_values(&[grund]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: KlingelMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<KlingelMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
