//! klingel-signaling – Presence- und Anruf-Signaling
//!
//! Dieser Crate implementiert den Koordinator fuer Klingel: wer ist
//! verbunden, wer ruft wen an, und die Weiterleitung der WebRTC-Aushandlung
//! zwischen zwei Teilnehmern. Medien fliessen nie ueber den Server.
//!
//! ## Architektur
//!
//! ```text
//! WebSocket-Endpunkt (ws::router)
//!     |
//!     v
//! Sitzung (pro Verbindung ein Task)
//!     |  Token pruefen -> registered -> zulassen -> Nachrichtenschleife
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- CallHandler    (Request, Accept, Decline, End)
//!     +-- SignalHandler  (WebrtcSignal, live oder zurueckgehalten)
//!     +-- RosterHandler  (GetUsers, ProfileUpdated, GetCallHistory)
//!
//! SignalingState – EIN Mutex ueber:
//!     PresenceRegistry – Wer ist verbunden, mit welchem Status
//!     PendingQueue     – Signale fuer unerreichbare Ziele
//!     AnrufTabelle     – Laufende Gespraeche
//!
//! Broadcast  – Roster an alle Verbundenen
//! Liveness   – Periodische Trennung inaktiver Teilnehmer
//! Recorder   – Abgeschlossene Gespraeche an das Anrufprotokoll
//! ```

pub mod broadcast;
pub mod calls;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod liveness;
pub mod pending;
pub mod presence;
mod recorder;
pub mod roster;
pub mod server_state;
pub mod ws;

// Bequeme Re-Exporte
pub use calls::{AnrufFehler, AnrufTabelle, CallPair};
pub use connection::{zulassung_pruefen, Eingang, Sitzung};
pub use dispatcher::{MessageDispatcher, VerbindungsKontext};
pub use error::{SignalingError, SignalingResult};
pub use liveness::ueberwachung_starten;
pub use pending::{PendingQueue, PendingSignal};
pub use presence::{
    PresenceRegistry, TeilnehmerAnsicht, TransportEmpfaenger, TransportHandle, VerbindungsId,
};
pub use roster::avatar_farbe;
pub use server_state::{
    Kollaborateure, SignalingConfig, SignalingState, TrennGrund, PARTNER_GETRENNT_TEXT,
};
pub use ws::{router, StatusAntwort};
