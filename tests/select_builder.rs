mod common;

use common::{CREW_STORE, Crew, crew, crew_database, crew_rows, crew_rows_except};
use futures::TryStreamExt;
use idbq::{Direction, ErrorClass, IdbError, IdbErrorCode, Key};

#[derive(Debug, PartialEq)]
enum LookupError {
    Missing(String),
    Custom,
    Db(IdbErrorCode),
}

impl From<String> for LookupError {
    fn from(message: String) -> Self {
        LookupError::Missing(message)
    }
}

impl From<IdbError> for LookupError {
    fn from(error: IdbError) -> Self {
        LookupError::Db(error.code())
    }
}

#[tokio::test]
async fn test_get_all_returns_rows_in_key_order() {
    let db = crew_database("select_get_all").await;
    let (rows, keys, count) = db
        .read(&[CREW_STORE], |trx| async move {
            let select = trx.select_from::<Crew>(CREW_STORE)?;
            let rows = select.get_all(None).await?;
            let keys = select.get_all_keys(None).await?;
            let count = select.count().await?;
            Ok::<_, IdbError>((rows, keys, count))
        })
        .await
        .expect("read crew");
    assert_eq!(rows, crew_rows());
    let expected: Vec<Key> = (1..=9).map(Key::from).collect();
    assert_eq!(keys, expected);
    assert_eq!(count, 9);
}

#[tokio::test]
async fn test_get_all_honours_limit() {
    let db = crew_database("select_limit").await;
    let rows = db
        .read(&[CREW_STORE], |trx| async move {
            trx.select_from::<Crew>(CREW_STORE)?.get_all(Some(3)).await
        })
        .await
        .expect("read crew");
    assert_eq!(rows, crew_rows()[..3].to_vec());
}

#[tokio::test]
async fn test_where_misuse_is_rejected() {
    let db = crew_database("select_misuse").await;
    let err = db
        .read(&[CREW_STORE], |trx| async move {
            trx.select_from::<Crew>(CREW_STORE)?.get_first().await
        })
        .await
        .expect_err("missing where");
    assert_eq!(err.to_string(), "Missing where clause");

    let err = db
        .read(&[CREW_STORE], |trx| async move {
            trx.select_from::<Crew>(CREW_STORE)?
                .by("unknown")?
                .get_first_key()
                .await
        })
        .await
        .expect_err("index order is not a where clause");
    assert_eq!(err.code(), IdbErrorCode::MissingWhereClause);

    let err = db
        .read(&[CREW_STORE], |trx| async move {
            trx.select_from::<Crew>(CREW_STORE)?
                .where_key("=", 1)?
                .where_key("=", 1)
                .map(|_| ())
        })
        .await
        .expect_err("redefined");
    assert_eq!(err.to_string(), "Where clause cannot be redefined");

    let err = db
        .read(&[CREW_STORE], |trx| async move {
            trx.select_from::<Crew>(CREW_STORE)?
                .by("unknown")?
                .where_("unknown", "=", 1)
                .map(|_| ())
        })
        .await
        .expect_err("redefined after by");
    assert_eq!(err.code(), IdbErrorCode::ClauseRedefined);

    let err = db
        .read(&[CREW_STORE], |trx| async move {
            trx.select_from::<Crew>(CREW_STORE)?
                .where_("unknown", "==", 1)
                .map(|_| ())
        })
        .await
        .expect_err("unknown operator");
    assert_eq!(err.to_string(), "Unknown operator ==");

    for op in ["[]", "(]", "[)", "()"] {
        let err = db
            .read(&[CREW_STORE], |trx| async move {
                trx.select_from::<Crew>(CREW_STORE)?
                    .where_key(op, 1)
                    .map(|_| ())
            })
            .await
            .expect_err("missing upper bound");
        assert_eq!(err.to_string(), format!("Missing upper bounds for {op}"));
    }
}

#[tokio::test]
async fn test_where_key_ranges_select_matching_rows() {
    let db = crew_database("select_where_key").await;
    let cases: Vec<(&str, i64, Option<i64>, Vec<i64>)> = vec![
        ("=", 3, None, vec![3]),
        ("<", 3, None, vec![1, 2]),
        ("<=", 3, None, vec![1, 2, 3]),
        (">=", 7, None, vec![7, 8, 9]),
        (">", 7, None, vec![8, 9]),
        ("[]", 3, Some(7), vec![3, 4, 5, 6, 7]),
        ("(]", 3, Some(7), vec![4, 5, 6, 7]),
        ("[)", 3, Some(7), vec![3, 4, 5, 6]),
        ("()", 3, Some(7), vec![4, 5, 6]),
    ];
    for (op, first, second, expected) in cases {
        let keys = db
            .read(&[CREW_STORE], |trx| async move {
                let select = trx.select_from::<Crew>(CREW_STORE)?;
                let select = match second {
                    Some(second) => select.where_key_range(op, first, second)?,
                    None => select.where_key(op, first)?,
                };
                select.get_all_keys(None).await
            })
            .await
            .expect("select keys");
        let expected: Vec<Key> = expected.into_iter().map(Key::from).collect();
        assert_eq!(keys, expected, "operator {op}");
    }
}

#[tokio::test]
async fn test_index_where_clause_uses_index_order() {
    let db = crew_database("select_index").await;
    let (savers, first_saver, zoe) = db
        .read(&[CREW_STORE], |trx| async move {
            let savers = trx
                .select_from::<Crew>(CREW_STORE)?
                .where_("type", "=", "savings")?
                .get_all_keys(None)
                .await?;
            let first_saver = trx
                .select_from::<Crew>(CREW_STORE)?
                .where_("type", "=", "savings")?
                .get_first()
                .await?;
            let zoe = trx
                .select_from::<Crew>(CREW_STORE)?
                .where_("name", "=", "Zoë")?
                .get_first_key_or_throw()
                .await?;
            Ok::<_, IdbError>((savers, first_saver, zoe))
        })
        .await
        .expect("index reads");
    let expected: Vec<Key> = [6, 7, 8, 9].into_iter().map(Key::from).collect();
    assert_eq!(savers, expected);
    assert_eq!(first_saver.map(|row| row.name), Some("River".to_string()));
    assert_eq!(zoe, Key::from(2));
}

#[tokio::test]
async fn test_by_index_orders_full_scan() {
    let db = crew_database("select_by").await;
    let names = db
        .read(&[CREW_STORE], |trx| async move {
            let rows = trx
                .select_from::<Crew>(CREW_STORE)?
                .by("name")?
                .get_all(None)
                .await?;
            Ok::<_, IdbError>(rows.into_iter().map(|row| row.name).collect::<Vec<_>>())
        })
        .await
        .expect("ordered by name");
    let mut expected: Vec<String> = crew_rows().into_iter().map(|row| row.name).collect();
    expected.sort();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn test_get_first_or_throw_variants() {
    let db = crew_database("select_or_throw").await;

    let err = db
        .read(&[CREW_STORE], |trx| async move {
            trx.select_from::<Crew>(CREW_STORE)?
                .where_key("=", 42)?
                .get_first_or_throw()
                .await
        })
        .await
        .expect_err("no row");
    assert_eq!(err.code(), IdbErrorCode::RecordNotFound);
    assert_eq!(err.to_string(), "No record found");

    let err = db
        .read(&[CREW_STORE], |trx| async move {
            trx.select_from::<Crew>(CREW_STORE)?
                .where_key("=", 42)?
                .get_first_or_else(ErrorClass::<LookupError>::new())
                .await
        })
        .await
        .expect_err("no row");
    assert_eq!(err, LookupError::Missing("No record found".into()));

    let err = db
        .read(&[CREW_STORE], |trx| async move {
            trx.select_from::<Crew>(CREW_STORE)?
                .where_key("=", 42)?
                .get_first_key_or_else(|| LookupError::Custom)
                .await
        })
        .await
        .expect_err("no key");
    assert_eq!(err, LookupError::Custom);

    let found = db
        .read(&[CREW_STORE], |trx| async move {
            trx.select_from::<Crew>(CREW_STORE)?
                .where_key("=", 5)?
                .get_first_or_else(|| LookupError::Custom)
                .await
        })
        .await
        .expect("row");
    assert_eq!(found.name, "Kaywinnet");
}

#[tokio::test]
async fn test_value_cursor_walks_both_directions() {
    let db = crew_database("select_cursor").await;
    let (forward, backward) = db
        .read(&[CREW_STORE], |trx| async move {
            let select = trx.select_from::<Crew>(CREW_STORE)?;
            let mut forward = Vec::new();
            let mut cursor = select.cursor(None)?;
            while let Some(entry) = cursor.next().await? {
                assert_eq!(entry.key, entry.primary_key);
                forward.push((entry.value, entry.primary_key));
            }
            let mut backward = Vec::new();
            let mut cursor = select.cursor(Some(Direction::Prev))?;
            while let Some(entry) = cursor.next().await? {
                backward.push((entry.value, entry.primary_key));
            }
            Ok::<_, IdbError>((forward, backward))
        })
        .await
        .expect("cursor walk");
    let expected: Vec<(Crew, Key)> = crew()
        .into_iter()
        .map(|(row, key)| (row, Key::from(key)))
        .collect();
    assert_eq!(forward, expected);
    let mut reversed = expected;
    reversed.reverse();
    assert_eq!(backward, reversed);
}

#[tokio::test]
async fn test_key_cursor_over_index_reports_index_keys() {
    let db = crew_database("select_key_cursor").await;
    let entries = db
        .read(&[CREW_STORE], |trx| async move {
            let mut cursor = trx
                .select_from::<Crew>(CREW_STORE)?
                .where_range("name", "[)", "A", "J")?
                .key_cursor(None)?;
            let mut entries = Vec::new();
            while let Some(entry) = cursor.next().await? {
                entries.push((entry.key, entry.primary_key));
            }
            Ok::<_, IdbError>(entries)
        })
        .await
        .expect("key cursor");
    assert_eq!(
        entries,
        vec![
            (Key::from("Derrial"), Key::from(9)),
            (Key::from("Hoban"), Key::from(3)),
            (Key::from("Inara"), Key::from(8)),
        ]
    );
}

#[tokio::test]
async fn test_advancing_cursor_visits_every_nth_row() {
    let db = crew_database("select_advance").await;
    let keys = db
        .read(&[CREW_STORE], |trx| async move {
            let mut cursor = trx.select_from::<Crew>(CREW_STORE)?.cursor(None)?;
            let mut keys = Vec::new();
            while let Some(entry) = cursor.next().await? {
                keys.push(entry.primary_key);
                cursor.advance(2)?;
            }
            Ok::<_, IdbError>(keys)
        })
        .await
        .expect("advance");
    let expected: Vec<Key> = [1, 3, 5, 7, 9].into_iter().map(Key::from).collect();
    assert_eq!(keys, expected);
}

#[tokio::test]
async fn test_continuing_cursor_skips_to_key() {
    let db = crew_database("select_continue").await;
    let keys = db
        .read(&[CREW_STORE], |trx| async move {
            let mut cursor = trx.select_from::<Crew>(CREW_STORE)?.cursor(None)?;
            let mut keys = Vec::new();
            while let Some(entry) = cursor.next().await? {
                let at = entry.primary_key.as_i64().unwrap_or_default();
                keys.push(entry.primary_key);
                cursor.continue_to(at + 3, None)?;
            }
            Ok::<_, IdbError>(keys)
        })
        .await
        .expect("continue");
    let expected: Vec<Key> = [1, 4, 7].into_iter().map(Key::from).collect();
    assert_eq!(keys, expected);
}

#[tokio::test]
async fn test_streams_project_rows_and_keys() {
    let db = crew_database("select_streams").await;
    let (rows, keys, primary_keys, skipped) = db
        .read(&[CREW_STORE], |trx| async move {
            let select = trx.select_from::<Crew>(CREW_STORE)?;
            let rows: Vec<Crew> = select.stream(None)?.into_stream().try_collect().await?;

            let mut keys = Vec::new();
            let mut stream = select.stream_keys(Some(Direction::Prev))?;
            while let Some(key) = stream.next().await? {
                keys.push(key);
            }

            let mut primary_keys = Vec::new();
            let mut stream = trx
                .select_from::<Crew>(CREW_STORE)?
                .where_("type", "=", "checking")?
                .stream_primary_keys(None)?;
            while let Some(key) = stream.next().await? {
                primary_keys.push(key);
            }

            let mut skipped = Vec::new();
            let mut stream = select.stream(None)?;
            let mut advance = None;
            while let Some(row) = stream.resume(advance).await? {
                skipped.push(row.name);
                advance = Some(3);
            }
            Ok::<_, IdbError>((rows, keys, primary_keys, skipped))
        })
        .await
        .expect("streams");
    assert_eq!(rows, crew_rows());
    let expected: Vec<Key> = (1..=9).rev().map(Key::from).collect();
    assert_eq!(keys, expected);
    let expected: Vec<Key> = (1..=5).map(Key::from).collect();
    assert_eq!(primary_keys, expected);
    assert_eq!(skipped, vec!["Malcolm", "Jayne", "Simon"]);
}

#[tokio::test]
async fn test_builder_into_stream_yields_all_rows() {
    let db = crew_database("select_into_stream").await;
    let rows = db
        .read(&[CREW_STORE], |trx| async move {
            trx.select_from::<Crew>(CREW_STORE)?
                .where_key(">", 6)?
                .into_stream()?
                .try_collect::<Vec<_>>()
                .await
        })
        .await
        .expect("stream");
    assert_eq!(rows, crew_rows_except(&[1, 2, 3, 4, 5, 6]));
}

#[tokio::test]
async fn test_cursor_update_and_delete_rewrite_rows() {
    let db = crew_database("select_cursor_writes").await;
    let halved = db
        .change(&[CREW_STORE], |trx| async move {
            let mut cursor = trx.select_from::<Crew>(CREW_STORE)?.cursor(None)?;
            let mut halved = Vec::new();
            let mut position = 0;
            while let Some(entry) = cursor.next().await? {
                if position % 2 == 0 {
                    let change = Crew {
                        balance: entry.value.balance / 2.0,
                        ..entry.value
                    };
                    let key = cursor.update(&change).await?;
                    assert_eq!(key, entry.primary_key);
                    halved.push(change);
                } else {
                    cursor.delete().await?;
                }
                position += 1;
            }
            Ok::<_, IdbError>(halved)
        })
        .await
        .expect("cursor writes");

    let (rows, count) = db
        .read(&[CREW_STORE], |trx| async move {
            let select = trx.select_from::<Crew>(CREW_STORE)?;
            Ok::<_, IdbError>((select.get_all(None).await?, select.count().await?))
        })
        .await
        .expect("read back");
    assert_eq!(rows, halved);
    assert_eq!(count, 5);
}

#[tokio::test]
async fn test_cursor_delete_over_key_range_leaves_complement() {
    let db = crew_database("select_cursor_delete").await;
    db.change(&[CREW_STORE], |trx| async move {
        let mut cursor = trx
            .select_from::<Crew>(CREW_STORE)?
            .where_key_range("[]", 3, 7)?
            .cursor(None)?;
        while cursor.next().await?.is_some() {
            cursor.delete().await?;
        }
        Ok::<_, IdbError>(())
    })
    .await
    .expect("delete via cursor");

    let (rows, keys) = db
        .read(&[CREW_STORE], |trx| async move {
            let select = trx.select_from::<Crew>(CREW_STORE)?;
            Ok::<_, IdbError>((select.get_all(None).await?, select.get_all_keys(None).await?))
        })
        .await
        .expect("read back");
    assert_eq!(rows, crew_rows_except(&[3, 4, 5, 6, 7]));
    let expected: Vec<Key> = [1, 2, 8, 9].into_iter().map(Key::from).collect();
    assert_eq!(keys, expected);
}

#[tokio::test]
async fn test_read_transaction_rejects_cursor_writes() {
    let db = crew_database("select_read_only").await;
    let err = db
        .read(&[CREW_STORE], |trx| async move {
            let mut cursor = trx.select_from::<Crew>(CREW_STORE)?.cursor(None)?;
            cursor.next().await?;
            cursor.delete().await
        })
        .await
        .expect_err("read-only");
    assert_eq!(err.code(), IdbErrorCode::ReadOnly);
}
