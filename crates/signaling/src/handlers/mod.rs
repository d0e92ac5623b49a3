//! Handler fuer alle Client-Nachrichten
//!
//! Jeder Handler ist fuer eine Gruppe von Nachrichtentypen zustaendig und
//! hat Zugriff auf den gemeinsamen SignalingState. Zustandsaenderungen
//! passieren unter dem Mutex, Benachrichtigungen und Broadcast danach.

pub mod call_handler;
pub mod roster_handler;
pub mod signal_handler;

use klingel_core::types::UserId;
use klingel_protocol::ServerMessage;

use crate::presence::TransportHandle;
use crate::server_state::{SignalingState, TrennGrund};

/// Stellt eine Nachricht an einen Gespraechspartner zu
///
/// Schlaegt die Zustellung fehl, wird der Partner ohne Broadcast entfernt;
/// der anschliessende Broadcast des Handlers deckt das mit ab.
pub(crate) fn partner_benachrichtigen(
    state: &SignalingState,
    partner: &UserId,
    transport: &TransportHandle,
    nachricht: ServerMessage,
) {
    let typ = nachricht.typ_name();
    if !transport.senden(nachricht) {
        tracing::warn!(user_id = %partner, typ, "Zustellung an Partner fehlgeschlagen");
        state.trennen_ohne_broadcast(partner, transport.verbindungs_id(), TrennGrund::SendeFehler);
    }
}
