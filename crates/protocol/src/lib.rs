//! klingel-protocol – Nachrichtenkatalog
//!
//! Dieses Crate definiert alle Nachrichtentypen, Enums und Strukturen
//! die zwischen Client und Signaling-Server ausgetauscht werden.

pub mod control;

pub use control::{
    CallRecordInfo, ClientMessage, ErrorCode, ProtokollFehler, RosterEntry, ServerMessage,
    UserStatus,
};
