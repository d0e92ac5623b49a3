//! Integration-Tests fuer den Signaling-Koordinator
//!
//! Die Sitzungen laufen ueber In-Process-Transporte; Tokens, Profile und
//! Anrufprotokoll kommen aus `SessionStore` und `MemoryDb`.

use async_trait::async_trait;
use futures_util::{sink, stream};
use klingel_auth::SessionStore;
use klingel_core::types::UserId;
use klingel_db::{
    AnrufDatensatz, BenutzerProfil, CallLogRepository, DbError, DbResult, MemoryDb,
};
use klingel_observability::{HealthState, KlingelMetrics};
use klingel_protocol::{RosterEntry, ServerMessage, UserStatus};
use klingel_signaling::{
    liveness::abgelaufene_trennen, zulassung_pruefen, Eingang, Kollaborateure, SignalingConfig,
    SignalingState, Sitzung, TransportEmpfaenger, TrennGrund, PARTNER_GETRENNT_TEXT,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Hilfen
// ---------------------------------------------------------------------------

const BENUTZER: &[(&str, &str)] = &[("a", "Anna"), ("b", "Bert"), ("c", "Carla")];

fn datenbank() -> MemoryDb {
    let db = MemoryDb::neu();
    for (id, name) in BENUTZER {
        db.benutzer_anlegen(BenutzerProfil::neu(*id, *name)).unwrap();
    }
    db
}

fn zustand(kollaborateure: Kollaborateure) -> Arc<SignalingState> {
    SignalingState::neu(
        SignalingConfig::default(),
        kollaborateure,
        KlingelMetrics::neu().unwrap(),
        HealthState::neu(),
    )
}

fn umgebung() -> (Arc<SignalingState>, MemoryDb) {
    let db = datenbank();
    let state = zustand(Kollaborateure::mit_datenbank(
        SessionStore::neu(),
        Arc::new(db.clone()),
    ));
    (state, db)
}

fn name_von(id: &str) -> &'static str {
    BENUTZER
        .iter()
        .find(|(i, _)| *i == id)
        .map(|(_, n)| *n)
        .unwrap_or("Unbekannt")
}

async fn verbinden(state: &Arc<SignalingState>, id: &str) -> (Sitzung, TransportEmpfaenger) {
    Sitzung::eroeffnen(
        Arc::clone(state),
        BenutzerProfil::neu(id, name_von(id)),
        &format!("token-{id}"),
    )
    .await
}

fn abholen(rx: &mut TransportEmpfaenger) -> Vec<ServerMessage> {
    std::iter::from_fn(|| rx.nachrichten.try_recv().ok()).collect()
}

fn letzter_roster(nachrichten: &[ServerMessage]) -> Option<&Vec<RosterEntry>> {
    nachrichten.iter().rev().find_map(|n| match n {
        ServerMessage::UserList { users } => Some(users),
        _ => None,
    })
}

fn eintrag<'a>(roster: &'a [RosterEntry], id: &str) -> &'a RosterEntry {
    roster
        .iter()
        .find(|e| e.id.as_str() == id)
        .unwrap_or_else(|| panic!("{id} fehlt im Roster"))
}

fn ohne_roster(nachrichten: Vec<ServerMessage>) -> Vec<ServerMessage> {
    nachrichten
        .into_iter()
        .filter(|n| !matches!(n, ServerMessage::UserList { .. }))
        .collect()
}

async fn gespraech_aufbauen(a: &Sitzung, b: &Sitzung) {
    a.text_verarbeiten(r#"{"type":"call_request","targetId":"b"}"#)
        .await;
    b.text_verarbeiten(r#"{"type":"call_accept"}"#).await;
}

async fn warten_bis(bedingung: impl Fn() -> bool) {
    for _ in 0..200 {
        if bedingung() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("Bedingung nicht erreicht");
}

// ---------------------------------------------------------------------------
// Zulassung
// ---------------------------------------------------------------------------

#[tokio::test]
async fn token_und_profil_werden_geprueft() {
    let db = datenbank();
    let tokens = SessionStore::neu();
    tokens
        .token_registrieren("geheim-a", UserId::from("a"))
        .await
        .unwrap();
    tokens
        .token_registrieren("geheim-x", UserId::from("x"))
        .await
        .unwrap();
    let state = zustand(Kollaborateure::mit_datenbank(tokens, Arc::new(db)));

    let anna = zulassung_pruefen(&state, "geheim-a").await.unwrap();
    assert_eq!(anna.username, "Anna");

    // Token gueltig, aber kein Profil
    let fehler = zulassung_pruefen(&state, "geheim-x").await.unwrap_err();
    assert!(fehler.ist_zulassungsfehler());

    let fehler = zulassung_pruefen(&state, "").await.unwrap_err();
    assert!(fehler.ist_zulassungsfehler());
    assert_eq!(state.verbundene_anzahl(), 0);
}

#[tokio::test]
async fn neue_verbindung_erscheint_bei_allen() {
    let (state, _db) = umgebung();
    let (_a, mut rx_a) = verbinden(&state, "a").await;
    abholen(&mut rx_a);

    let (_b, mut rx_b) = verbinden(&state, "b").await;

    let bei_a = abholen(&mut rx_a);
    let roster_a = letzter_roster(&bei_a).unwrap();
    assert!(eintrag(roster_a, "b").online);
    assert_eq!(eintrag(roster_a, "c").status, UserStatus::Offline);

    let bei_b = abholen(&mut rx_b);
    match &bei_b[0] {
        ServerMessage::Registered {
            user_id,
            online_users,
            ..
        } => {
            assert_eq!(user_id, &UserId::from("b"));
            assert!(eintrag(online_users, "a").online);
            assert!(online_users.iter().all(|e| e.id.as_str() != "b"));
        }
        andere => panic!("registered erwartet, erhalten: {andere:?}"),
    }
}

// ---------------------------------------------------------------------------
// Anrufe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anfrage_und_annahme_verknuepfen_beide() {
    let (state, _db) = umgebung();
    let (a, mut rx_a) = verbinden(&state, "a").await;
    let (b, mut rx_b) = verbinden(&state, "b").await;
    abholen(&mut rx_a);
    abholen(&mut rx_b);

    a.text_verarbeiten(r#"{"type":"call_request","targetId":"b"}"#)
        .await;
    let bei_b = ohne_roster(abholen(&mut rx_b));
    assert!(matches!(
        bei_b.as_slice(),
        [ServerMessage::IncomingCall { caller_id, caller_name, .. }]
            if caller_id.as_str() == "a" && caller_name == "Anna"
    ));

    b.text_verarbeiten(r#"{"type":"call_accept"}"#).await;
    let bei_a = abholen(&mut rx_a);
    assert!(bei_a.iter().any(|n| matches!(
        n,
        ServerMessage::CallAccepted { callee_id, callee_name }
            if callee_id.as_str() == "b" && callee_name == "Bert"
    )));
    assert_eq!(
        eintrag(letzter_roster(&bei_a).unwrap(), "b").status,
        UserStatus::InCall
    );

    let anna = state.teilnehmer(&UserId::from("a")).unwrap();
    let bert = state.teilnehmer(&UserId::from("b")).unwrap();
    assert_eq!(anna.status, UserStatus::InCall);
    assert_eq!(bert.status, UserStatus::InCall);
    assert_eq!(anna.partner, Some(UserId::from("b")));
    assert_eq!(bert.partner, Some(UserId::from("a")));
    assert_eq!(state.laufende_anrufe(), 1);
}

#[tokio::test]
async fn selbstanruf_und_besetzt_werden_abgelehnt() {
    let (state, _db) = umgebung();
    let (a, mut rx_a) = verbinden(&state, "a").await;
    let (_b, _rx_b) = verbinden(&state, "b").await;
    let (c, mut rx_c) = verbinden(&state, "c").await;
    abholen(&mut rx_a);
    abholen(&mut rx_c);

    a.text_verarbeiten(r#"{"type":"call_request","targetId":"a"}"#)
        .await;
    assert!(matches!(
        ohne_roster(abholen(&mut rx_a)).as_slice(),
        [ServerMessage::CallError { .. }]
    ));
    assert_eq!(
        state.teilnehmer(&UserId::from("a")).unwrap().status,
        UserStatus::Available
    );

    a.text_verarbeiten(r#"{"type":"call_request","targetId":"b"}"#)
        .await;
    abholen(&mut rx_c);
    c.text_verarbeiten(r#"{"type":"call_request","targetId":"b"}"#)
        .await;
    assert!(matches!(
        ohne_roster(abholen(&mut rx_c)).as_slice(),
        [ServerMessage::CallError { .. }]
    ));
    assert_eq!(
        state.teilnehmer(&UserId::from("b")).unwrap().partner,
        Some(UserId::from("a"))
    );
    assert_eq!(
        state.teilnehmer(&UserId::from("c")).unwrap().status,
        UserStatus::Available
    );
}

#[tokio::test]
async fn anruf_an_abwesende_wird_abgelehnt() {
    let (state, _db) = umgebung();
    let (a, mut rx_a) = verbinden(&state, "a").await;
    abholen(&mut rx_a);

    a.text_verarbeiten(r#"{"type":"call_request","targetId":"c"}"#)
        .await;
    assert!(matches!(
        abholen(&mut rx_a).as_slice(),
        [ServerMessage::CallError { .. }]
    ));
}

#[tokio::test]
async fn trennung_im_gespraech_gibt_partner_frei() {
    let (state, db) = umgebung();
    let (a, _rx_a) = verbinden(&state, "a").await;
    let (b, mut rx_b) = verbinden(&state, "b").await;
    let (_c, mut rx_c) = verbinden(&state, "c").await;
    gespraech_aufbauen(&a, &b).await;
    abholen(&mut rx_b);
    abholen(&mut rx_c);

    a.beenden(TrennGrund::Client).await;

    let bei_b = abholen(&mut rx_b);
    assert!(bei_b.contains(&ServerMessage::PeerDisconnected {
        user_id: UserId::from("a"),
        message: PARTNER_GETRENNT_TEXT.to_string(),
    }));
    let roster_b = letzter_roster(&bei_b).unwrap();
    assert_eq!(eintrag(roster_b, "a").status, UserStatus::Offline);

    let roster_c = abholen(&mut rx_c);
    let roster_c = letzter_roster(&roster_c).unwrap();
    assert_eq!(eintrag(roster_c, "b").status, UserStatus::Available);

    let bert = state.teilnehmer(&UserId::from("b")).unwrap();
    assert_eq!(bert.status, UserStatus::Available);
    assert!(bert.partner.is_none());
    assert_eq!(state.laufende_anrufe(), 0);

    // Gespraech wurde trotz Trennung protokolliert
    let mut protokolliert = false;
    for _ in 0..200 {
        if !db.verlauf(&UserId::from("b"), 10).await.unwrap().is_empty() {
            protokolliert = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(protokolliert);
}

#[tokio::test]
async fn beendetes_gespraech_im_verlauf() {
    let (state, _db) = umgebung();
    let (a, mut rx_a) = verbinden(&state, "a").await;
    let (b, _rx_b) = verbinden(&state, "b").await;
    gespraech_aufbauen(&a, &b).await;
    a.text_verarbeiten(r#"{"type":"call_end"}"#).await;
    assert_eq!(state.laufende_anrufe(), 0);
    abholen(&mut rx_a);

    let mut gefunden = None;
    for _ in 0..200 {
        a.text_verarbeiten(r#"{"type":"get_call_history","limit":5}"#)
            .await;
        if let Some(ServerMessage::CallHistory { calls }) = abholen(&mut rx_a)
            .into_iter()
            .find(|n| matches!(n, ServerMessage::CallHistory { .. }))
        {
            if !calls.is_empty() {
                gefunden = Some(calls);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let calls = gefunden.expect("Verlauf sollte einen Eintrag haben");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].caller_id, UserId::from("a"));
    assert_eq!(calls[0].callee_id, UserId::from("b"));
    assert_eq!(calls[0].call_type, "audio");
}

// ---------------------------------------------------------------------------
// WebRTC-Signale
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zurueckgehaltene_signale_in_reihenfolge() {
    let (state, _db) = umgebung();
    let (a, _rx_a) = verbinden(&state, "a").await;

    let signale = [
        json!({"type": "offer", "sdp": "v=0"}),
        json!({"candidate": "1"}),
        json!({"candidate": "2"}),
    ];
    for signal in &signale {
        let text = json!({"type": "webrtc_signal", "targetId": "b", "signal": signal});
        a.text_verarbeiten(&text.to_string()).await;
    }
    assert_eq!(state.pending_anzahl(&UserId::from("b")), 3);

    let (_b, mut rx_b) = verbinden(&state, "b").await;
    let bei_b = abholen(&mut rx_b);

    assert!(matches!(bei_b[0], ServerMessage::Registered { .. }));
    let zugestellt: Vec<ServerMessage> = bei_b
        .into_iter()
        .filter(|n| matches!(n, ServerMessage::WebrtcSignal { .. }))
        .collect();
    let erwartet: Vec<ServerMessage> = signale
        .iter()
        .map(|s| ServerMessage::WebrtcSignal {
            signal: s.clone(),
            sender_id: UserId::from("a"),
        })
        .collect();
    assert_eq!(zugestellt, erwartet);
    assert_eq!(state.pending_anzahl(&UserId::from("b")), 0);
    assert_eq!(
        state
            .metriken
            .signals_total
            .with_label_values(&["delivered_pending"])
            .get(),
        3
    );
}

#[tokio::test]
async fn ungeschriebene_signale_bei_sendefehler_zurueckgehalten() {
    let (state, _db) = umgebung();
    let (a, _rx_a) = verbinden(&state, "a").await;
    let (b, rx_b) = verbinden(&state, "b").await;

    let signal = json!({"type": "offer", "sdp": "v=0"});
    let text = json!({"type": "webrtc_signal", "targetId": "b", "signal": signal});
    a.text_verarbeiten(&text.to_string()).await;
    assert_eq!(state.pending_anzahl(&UserId::from("b")), 0);

    // Transport bricht beim ersten Frame ab
    let ausgang = sink::unfold((), |(), _text: String| async { Err::<(), _>("kaputt") });
    let grund = b
        .betreiben(rx_b, stream::pending::<Eingang>(), Box::pin(ausgang))
        .await;

    assert_eq!(grund, TrennGrund::Transportfehler);
    assert!(state.teilnehmer(&UserId::from("b")).is_none());
    assert_eq!(state.pending_anzahl(&UserId::from("b")), 1);
    assert_eq!(
        state
            .metriken
            .signals_total
            .with_label_values(&["requeued"])
            .get(),
        1
    );

    let (_b, mut rx_b) = verbinden(&state, "b").await;
    let zugestellt: Vec<ServerMessage> = abholen(&mut rx_b)
        .into_iter()
        .filter(|n| matches!(n, ServerMessage::WebrtcSignal { .. }))
        .collect();
    assert_eq!(
        zugestellt,
        vec![ServerMessage::WebrtcSignal {
            signal,
            sender_id: UserId::from("a"),
        }]
    );
}

#[tokio::test]
async fn verdraengte_sitzung_reicht_signale_weiter() {
    let (state, _db) = umgebung();
    let (a, _rx_a) = verbinden(&state, "a").await;
    let (alt, rx_alt) = verbinden(&state, "b").await;

    for n in ["1", "2"] {
        let text = json!({"type": "webrtc_signal", "targetId": "b", "signal": {"candidate": n}});
        a.text_verarbeiten(&text.to_string()).await;
    }

    let (_neu, mut rx_neu) = verbinden(&state, "b").await;
    abholen(&mut rx_neu);

    let ausgang = sink::unfold((), |(), _text: String| async {
        Ok::<_, std::convert::Infallible>(())
    });
    let grund = alt
        .betreiben(rx_alt, stream::pending::<Eingang>(), Box::pin(ausgang))
        .await;
    assert_eq!(grund, TrennGrund::Server);

    let kandidaten: Vec<serde_json::Value> = abholen(&mut rx_neu)
        .into_iter()
        .filter_map(|n| match n {
            ServerMessage::WebrtcSignal { signal, .. } => Some(signal["candidate"].clone()),
            _ => None,
        })
        .collect();
    assert_eq!(kandidaten, vec![json!("1"), json!("2")]);
    assert_eq!(state.pending_anzahl(&UserId::from("b")), 0);
}

// ---------------------------------------------------------------------------
// Verbindungsabbau
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zweite_verbindung_verdraengt_erste() {
    let (state, _db) = umgebung();
    let (alt, mut rx_alt) = verbinden(&state, "a").await;
    let (neu, _rx_neu) = verbinden(&state, "a").await;

    assert!(*rx_alt.schliessen.borrow_and_update());
    assert_eq!(state.verbundene_anzahl(), 1);

    // Abbau der alten Sitzung laesst die neue bestehen
    alt.beenden(TrennGrund::Server).await;
    let anna = state.teilnehmer(&UserId::from("a")).unwrap();
    assert_eq!(anna.verbindungs_id, neu.kontext().verbindungs_id);
}

#[tokio::test]
async fn verdraengte_sitzung_haelt_nachfolger_nicht_am_leben() {
    let (state, _db) = umgebung();
    let (alt, _rx_alt) = verbinden(&state, "a").await;
    let (neu, _rx_neu) = verbinden(&state, "a").await;
    let anna = UserId::from("a");
    let vorher = state.teilnehmer(&anna).unwrap().zuletzt_gesehen;

    tokio::time::sleep(Duration::from_millis(20)).await;
    alt.text_verarbeiten(r#"{"type":"heartbeat"}"#).await;
    assert_eq!(state.teilnehmer(&anna).unwrap().zuletzt_gesehen, vorher);

    neu.text_verarbeiten(r#"{"type":"heartbeat"}"#).await;
    assert!(state.teilnehmer(&anna).unwrap().zuletzt_gesehen > vorher);
}

#[tokio::test]
async fn liveness_trennt_stille_teilnehmer() {
    let (state, _db) = umgebung();
    let (_a, _rx_a) = verbinden(&state, "a").await;
    let (_b, _rx_b) = verbinden(&state, "b").await;

    assert_eq!(abgelaufene_trennen(&state, Instant::now()).await, 0);

    let spaeter = Instant::now() + state.config.liveness_timeout + Duration::from_secs(1);
    assert_eq!(abgelaufene_trennen(&state, spaeter).await, 2);
    assert_eq!(state.verbundene_anzahl(), 0);
    assert_eq!(
        state
            .metriken
            .evictions_total
            .with_label_values(&["liveness"])
            .get(),
        2
    );
}

#[tokio::test]
async fn nachrichtenschleife_bis_client_schliesst() {
    let (state, _db) = umgebung();
    let (a, rx_a) = verbinden(&state, "a").await;

    let gesendet = Arc::new(Mutex::new(Vec::<String>::new()));
    let ausgang = sink::unfold(Arc::clone(&gesendet), |ablage, text: String| async move {
        ablage.lock().unwrap().push(text);
        Ok::<_, std::convert::Infallible>(ablage)
    });
    let eingang = stream::iter(vec![
        Eingang::Text(r#"{"type":"heartbeat"}"#.to_string()),
        Eingang::Text("kein json".to_string()),
        Eingang::Geschlossen,
    ]);

    let grund = a.betreiben(rx_a, eingang, Box::pin(ausgang)).await;
    assert_eq!(grund, TrennGrund::Client);
    assert_eq!(state.verbundene_anzahl(), 0);

    let typen: Vec<String> = gesendet
        .lock()
        .unwrap()
        .iter()
        .map(|t| {
            let wert: serde_json::Value = serde_json::from_str(t).unwrap();
            wert["type"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(typen, vec!["registered", "user_list", "heartbeat_ack", "error"]);
}

// ---------------------------------------------------------------------------
// Persistenzfehler
// ---------------------------------------------------------------------------

struct KaputtesProtokoll;

#[async_trait]
impl CallLogRepository for KaputtesProtokoll {
    async fn speichern(&self, _datensatz: AnrufDatensatz) -> DbResult<()> {
        Err(DbError::NichtVerfuegbar("Platte voll".into()))
    }

    async fn verlauf(&self, _user_id: &UserId, _limit: usize) -> DbResult<Vec<AnrufDatensatz>> {
        Err(DbError::NichtVerfuegbar("Platte voll".into()))
    }
}

#[tokio::test]
async fn persistenzfehler_aendert_keinen_zustand() {
    let db = Arc::new(datenbank());
    let kollaborateure = Kollaborateure {
        tokens: SessionStore::neu(),
        profile: db.clone(),
        roster: db,
        anrufprotokoll: Arc::new(KaputtesProtokoll),
    };
    let state = zustand(kollaborateure);
    let (a, mut rx_a) = verbinden(&state, "a").await;
    let (b, _rx_b) = verbinden(&state, "b").await;

    gespraech_aufbauen(&a, &b).await;
    b.text_verarbeiten(r#"{"type":"call_end"}"#).await;

    let health = state.health.clone();
    warten_bis(|| !health.persistenz_in_ordnung()).await;

    assert_eq!(
        state.teilnehmer(&UserId::from("a")).unwrap().status,
        UserStatus::Available
    );
    assert_eq!(
        state.teilnehmer(&UserId::from("b")).unwrap().status,
        UserStatus::Available
    );

    abholen(&mut rx_a);
    a.text_verarbeiten(r#"{"type":"get_call_history"}"#).await;
    assert!(matches!(
        abholen(&mut rx_a).as_slice(),
        [ServerMessage::Error { .. }]
    ));
}
