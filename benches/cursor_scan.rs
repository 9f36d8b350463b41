use criterion::{Criterion, black_box, criterion_group, criterion_main};
use idbq::{
    DatabaseDefinition, DatabaseOptions, Factory, IdbError, IndexParams, KeyPath, Migration,
    define_database,
};
use serde::{Deserialize, Serialize};
use tokio::runtime::Builder;

const STORE: &str = "users";
const SEEDED_ROWS: i64 = 10_000;
const BATCH_ROWS: i64 = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    name: String,
    age: i64,
}

fn user(id: i64) -> User {
    User {
        name: format!("user-{id}"),
        age: 18 + (id % 50),
    }
}

async fn setup_db(seed_rows: i64) -> DatabaseDefinition {
    let migration = Migration::sync(|db| {
        let store = db.create_store(STORE, KeyPath::Manual)?;
        store.create_index("by_age", "age", IndexParams::default())?;
        Ok(())
    });
    let db = define_database(
        &Factory::default(),
        DatabaseOptions::new("bench").migration(migration),
    );
    db.change(&[STORE], |trx| async move {
        let insert = trx.insert_into::<User>(STORE)?;
        for id in 1..=seed_rows {
            insert.add_with_key(&user(id), id).await?;
        }
        Ok::<_, IdbError>(())
    })
    .await
    .expect("seed rows");
    db
}

fn bench_query_paths(c: &mut Criterion) {
    let rt = Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    let db = rt.block_on(setup_db(SEEDED_ROWS));

    let mut next_id = 1_i64;
    c.bench_function("point_query_by_primary_key", |b| {
        b.iter(|| {
            rt.block_on(async {
                let id = black_box(next_id);
                next_id = next_id % SEEDED_ROWS + 1;
                db.read(&[STORE], |trx| async move {
                    trx.select_from::<User>(STORE)?
                        .where_key("=", id)?
                        .get_first()
                        .await
                })
                .await
                .expect("point query");
            });
        })
    });

    c.bench_function("index_range_count", |b| {
        b.iter(|| {
            rt.block_on(async {
                db.read(&[STORE], |trx| async move {
                    trx.select_from::<User>(STORE)?
                        .where_range("by_age", "[)", 20, 30)?
                        .count()
                        .await
                })
                .await
                .expect("range count");
            });
        })
    });

    c.bench_function("cursor_scan_1000_rows", |b| {
        b.iter(|| {
            rt.block_on(async {
                db.read(&[STORE], |trx| async move {
                    let mut cursor = trx
                        .select_from::<User>(STORE)?
                        .where_key_range("[]", 1, 1_000)?
                        .cursor(None)?;
                    let mut total = 0_i64;
                    while let Some(entry) = cursor.next().await? {
                        total += entry.value.age;
                    }
                    Ok::<_, IdbError>(black_box(total))
                })
                .await
                .expect("cursor scan");
            });
        })
    });

    let mut next_base = 1_i64;
    c.bench_function("put_64_rows_in_one_change", |b| {
        b.iter(|| {
            rt.block_on(async {
                let base = black_box(next_base);
                next_base = (next_base + BATCH_ROWS - 1) % SEEDED_ROWS + 1;
                db.change(&[STORE], |trx| async move {
                    let update = trx.update::<User>(STORE)?;
                    for offset in 0..BATCH_ROWS {
                        let id = (base + offset - 1) % SEEDED_ROWS + 1;
                        update.put_with_key(&user(id), id).await?;
                    }
                    Ok::<_, IdbError>(())
                })
                .await
                .expect("batch put");
            });
        })
    });
}

criterion_group!(benches, bench_query_paths);
criterion_main!(benches);
