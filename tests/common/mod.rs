#![allow(dead_code)]

use idbq::{
    DatabaseDefinition, DatabaseOptions, Factory, IdbError, IndexParams, KeyPath, Migration,
    define_database,
};
use serde::{Deserialize, Serialize};

pub const CREW_STORE: &str = "crew";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crew {
    pub name: String,
    pub balance: f64,
    #[serde(rename = "type")]
    pub kind: String,
}

fn member(name: &str, balance: f64, kind: &str) -> Crew {
    Crew {
        name: name.to_string(),
        balance,
        kind: kind.to_string(),
    }
}

/// Nine rows keyed 1 through 9, in key order.
pub fn crew() -> Vec<(Crew, i64)> {
    vec![
        (member("Malcolm", 20_092.76, "checking"), 1),
        (member("Zoë", 17_521.86, "checking"), 2),
        (member("Hoban", 10_784.41, "checking"), 3),
        (member("Jayne", 10_282.05, "checking"), 4),
        (member("Kaywinnet", 12_401.22, "checking"), 5),
        (member("River", 102_102.01, "savings"), 6),
        (member("Simon", 97_208.11, "savings"), 7),
        (member("Inara", 31_100.49, "savings"), 8),
        (member("Derrial", 5_789.12, "savings"), 9),
    ]
}

pub fn crew_rows() -> Vec<Crew> {
    crew().into_iter().map(|(row, _)| row).collect()
}

pub fn crew_rows_except(keys: &[i64]) -> Vec<Crew> {
    crew()
        .into_iter()
        .filter(|(_, key)| !keys.contains(key))
        .map(|(row, _)| row)
        .collect()
}

/// Manual-key store with a unique `name` index and a `type` index.
pub fn crew_migration() -> Migration {
    Migration::sync(|db| {
        let store = db.create_store(CREW_STORE, KeyPath::Manual)?;
        store.create_index("name", "name", IndexParams::unique())?;
        store.create_index("type", "type", IndexParams::default())?;
        Ok(())
    })
}

pub async fn crew_database(name: &str) -> DatabaseDefinition {
    let factory = Factory::default();
    let definition = define_database(
        &factory,
        DatabaseOptions::new(name).migration(crew_migration()),
    );
    definition
        .change(&[CREW_STORE], |trx| async move {
            let builder = trx.update::<Crew>(CREW_STORE)?;
            for (row, key) in crew() {
                builder.add_with_key(&row, key).await?;
            }
            Ok::<_, IdbError>(())
        })
        .await
        .expect("seed crew");
    definition
}
