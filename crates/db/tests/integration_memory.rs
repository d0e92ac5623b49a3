//! Integration-Tests fuer die In-Memory-Datenbank

use chrono::{Duration, Utc};
use klingel_core::types::{CallId, UserId};
use klingel_db::{
    AnrufDatensatz, AnrufTyp, BenutzerProfil, CallLogRepository, DbError, MemoryDb,
    ProfileRepository, RosterRepository,
};

fn db_mit_benutzern() -> MemoryDb {
    let db = MemoryDb::neu();
    db.benutzer_anlegen(BenutzerProfil::neu("b", "bert")).unwrap();
    db.benutzer_anlegen(BenutzerProfil::neu("a", "Anna").mit_avatar("/avatars/a.png"))
        .unwrap();
    db.benutzer_anlegen(BenutzerProfil::neu("c", "Carla")).unwrap();
    db
}

fn datensatz(anrufer: &str, angerufener: &str, vor_minuten: i64) -> AnrufDatensatz {
    let ende = Utc::now() - Duration::minutes(vor_minuten);
    AnrufDatensatz {
        call_id: CallId::new(),
        anrufer: UserId::from(anrufer),
        angerufener: UserId::from(angerufener),
        beginn: ende - Duration::seconds(42),
        ende,
        dauer_sek: 42,
        typ: AnrufTyp::Audio,
    }
}

#[tokio::test]
async fn profil_laden() {
    let db = db_mit_benutzern();

    let anna = db
        .profil_laden(&UserId::from("a"))
        .await
        .unwrap()
        .expect("Anna sollte gefunden werden");
    assert_eq!(anna.username, "Anna");
    assert_eq!(anna.avatar_url.as_deref(), Some("/avatars/a.png"));

    let niemand = db.profil_laden(&UserId::from("x")).await.unwrap();
    assert!(niemand.is_none());
}

#[tokio::test]
async fn roster_nach_name_sortiert() {
    let db = db_mit_benutzern();
    let namen: Vec<String> = db
        .alle_benutzer()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.username)
        .collect();
    assert_eq!(namen, vec!["Anna", "bert", "Carla"]);
}

#[test]
fn doppelter_benutzername_abgelehnt() {
    let db = db_mit_benutzern();
    let fehler = db
        .benutzer_anlegen(BenutzerProfil::neu("z", "ANNA"))
        .unwrap_err();
    assert!(matches!(fehler, DbError::Eindeutigkeit(_)));
    assert_eq!(db.benutzer_anzahl(), 3);
}

#[test]
fn doppelte_id_abgelehnt() {
    let db = db_mit_benutzern();
    let fehler = db
        .benutzer_anlegen(BenutzerProfil::neu("a", "Andere"))
        .unwrap_err();
    assert!(matches!(fehler, DbError::Eindeutigkeit(_)));
}

#[tokio::test]
async fn verlauf_neueste_zuerst_und_begrenzt() {
    let db = db_mit_benutzern();
    db.speichern(datensatz("a", "b", 30)).await.unwrap();
    db.speichern(datensatz("c", "a", 10)).await.unwrap();
    db.speichern(datensatz("b", "c", 5)).await.unwrap();
    db.speichern(datensatz("a", "c", 20)).await.unwrap();

    let verlauf = db.verlauf(&UserId::from("a"), 50).await.unwrap();
    assert_eq!(verlauf.len(), 3);
    assert!(verlauf.windows(2).all(|w| w[0].ende >= w[1].ende));
    assert_eq!(verlauf[0].anrufer, UserId::from("c"));

    let begrenzt = db.verlauf(&UserId::from("a"), 2).await.unwrap();
    assert_eq!(begrenzt.len(), 2);
}
