mod common;

use common::{CREW_STORE, Crew, crew_database, crew_migration};
use idbq::{
    DatabaseOptions, EngineConfig, Factory, IdbErrorCode, define_database, drop_database,
    list_databases, open_database, request_database_persistence,
};

#[tokio::test]
async fn test_opened_databases_are_listed_and_dropped() {
    let factory = Factory::default();
    let options = DatabaseOptions::new("ledger").migration(crew_migration());
    let db = open_database(&factory, &options).await.expect("open");
    assert_eq!(db.name(), "ledger");
    assert_eq!(db.version(), 1);
    assert_eq!(list_databases(&factory), vec!["ledger".to_string()]);

    let err = drop_database(&factory, "ledger")
        .await
        .expect_err("open connection");
    assert_eq!(err.code(), IdbErrorCode::Blocked);

    db.close();
    assert!(db.is_closed());
    drop_database(&factory, "ledger").await.expect("drop");
    assert!(list_databases(&factory).is_empty());

    // dropping a database that does not exist succeeds
    drop_database(&factory, "ledger").await.expect("drop again");
}

#[tokio::test]
async fn test_closed_connection_refuses_transactions() {
    let factory = Factory::default();
    let options = DatabaseOptions::new("closed").migration(crew_migration());
    let db = open_database(&factory, &options).await.expect("open");
    db.close();
    let err = db
        .read(&[CREW_STORE], |trx| async move {
            trx.select_from::<Crew>(CREW_STORE)?.count().await
        })
        .await
        .expect_err("closed");
    assert_eq!(err.code(), IdbErrorCode::InvalidState);
}

#[tokio::test]
async fn test_definition_reopens_after_close() {
    let db = crew_database("reopen").await;
    let first = db.connect().await.expect("connect");
    let shared = db.connect().await.expect("connect again");
    assert!(!first.is_closed());
    assert_eq!(first.version(), shared.version());

    db.close().await;
    assert!(first.is_closed());

    let count = db
        .read(&[CREW_STORE], |trx| async move {
            trx.select_from::<Crew>(CREW_STORE)?.count().await
        })
        .await
        .expect("count after reopen");
    assert_eq!(count, 9);
}

#[tokio::test]
async fn test_persistence_is_requested_once() {
    let factory = Factory::default();
    assert!(!factory.persisted());
    let granted = request_database_persistence(&factory, true)
        .await
        .expect("granted");
    assert!(granted);
    assert!(factory.persisted());

    let already = Factory::new(EngineConfig::default().with_persisted(true));
    assert!(
        request_database_persistence(&already, true)
            .await
            .expect("already persisted")
    );
}

#[tokio::test]
async fn test_denied_persistence() {
    let factory = Factory::new(EngineConfig::default().with_grant_persistence(false));
    let granted = request_database_persistence(&factory, false)
        .await
        .expect("no failure requested");
    assert!(!granted);

    let err = request_database_persistence(&factory, true)
        .await
        .expect_err("denied");
    assert_eq!(err.code(), IdbErrorCode::PersistenceDenied);

    // opening still works, the denial is only logged
    let db = define_database(
        &factory,
        DatabaseOptions::new("volatile")
            .migration(crew_migration())
            .persist(true),
    );
    assert_eq!(db.version().await.expect("version"), 1);
}

#[tokio::test]
async fn test_engine_presets() {
    assert_eq!(EngineConfig::default().idle_yields, 8);
    assert!(EngineConfig::strict().idle_yields < EngineConfig::default().idle_yields);
    assert!(EngineConfig::relaxed().idle_yields > EngineConfig::default().idle_yields);
    assert_eq!(EngineConfig::default().with_idle_yields(0).idle_yields, 1);
}

#[tokio::test]
async fn test_strict_engine_still_serves_awaited_requests() {
    let factory = Factory::new(EngineConfig::strict());
    let db = define_database(
        &factory,
        DatabaseOptions::new("strict").migration(crew_migration()),
    );
    let rows = db
        .change(&[CREW_STORE], |trx| async move {
            let insert = trx.insert_into::<Crew>(CREW_STORE)?;
            for key in 1..=3 {
                let row = Crew {
                    name: format!("crew {key}"),
                    balance: f64::from(key),
                    kind: "checking".into(),
                };
                insert.add_with_key(&row, key).await?;
            }
            trx.select_from::<Crew>(CREW_STORE)?.count().await
        })
        .await
        .expect("writes");
    assert_eq!(rows, 3);
}
