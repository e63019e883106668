//! Integration tests against a live PostgreSQL or Greenplum server
//!
//! Set `GPDF_TEST_DATABASE_URL` (e.g. `postgresql://gpadmin@localhost/postgres`)
//! to run them; without it every test prints a notice and returns.

use gpdf_core::builtin::count;
use gpdf_core::{ColumnSelection, DbError, Error, Expr, JoinSpec, JoinType, Session, Settings, Value};
use gpdf_pg::PgDatabase;
use gpdf_registry::{RegisterOptions, Registrar};

fn session() -> Option<Session> {
    let url = match std::env::var("GPDF_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: GPDF_TEST_DATABASE_URL is not set");
            return None;
        }
    };
    let db = PgDatabase::connect(&url).expect("failed to connect to test database");
    Some(Session::new(db, Settings::default()))
}

fn ints(values: &[i64]) -> Vec<Vec<Value>> {
    values.iter().map(|v| vec![Value::Int(*v)]).collect()
}

fn column(df: &gpdf_core::DataFrame, name: &str) -> Vec<i64> {
    let mut values: Vec<i64> = df
        .iter()
        .unwrap()
        .map(|row| row.get(name).and_then(|v| v.as_i64()).unwrap())
        .collect();
    values.sort();
    values
}

#[test]
fn test_cache_until_refresh() {
    let Some(session) = session() else { return };
    session.run("CREATE TEMP TABLE gpdf_cache (id integer)").unwrap();
    session.run("INSERT INTO gpdf_cache VALUES (1)").unwrap();

    let df = session.table("gpdf_cache");
    assert_eq!(df.iter().unwrap().count(), 1);

    session.run("INSERT INTO gpdf_cache VALUES (2)").unwrap();
    assert_eq!(df.iter().unwrap().count(), 1);

    df.refresh().unwrap();
    assert_eq!(df.iter().unwrap().count(), 2);
}

#[test]
fn test_save_as_round_trip() {
    let Some(session) = session() else { return };
    let df = session.from_rows(ints(&[3, 1, 2]), ["id"]).unwrap();
    let saved = df.save_as("gpdf_saved", ["id"], true).unwrap();
    assert!(saved.is_table());
    assert_eq!(column(&saved, "id"), vec![1, 2, 3]);
}

#[test]
fn test_self_cross_join() {
    let Some(session) = session() else { return };
    let df = session.from_rows(ints(&[1, 2, 3]), ["id"]).unwrap();
    let joined = df
        .join(
            &df,
            JoinSpec::new(JoinType::Cross)
                .self_columns(ColumnSelection::none().renamed("id", "a"))
                .other_columns(ColumnSelection::none().renamed("id", "b")),
        )
        .unwrap();
    assert_eq!(joined.iter().unwrap().count(), 9);
}

#[test]
fn test_filter_and_order() {
    let Some(session) = session() else { return };
    let df = session.from_rows(ints(&[5, 4, 3, 2, 1]), ["id"]).unwrap();
    let top = df
        .filter(|t| t.col("id").gt(1))
        .unwrap()
        .order_by("id")
        .unwrap()
        .head(2);
    let ids: Vec<i64> = top
        .iter()
        .unwrap()
        .map(|row| row.get("id").and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(ids, vec![2, 3]);
}

#[test]
fn test_grouping() {
    let Some(session) = session() else { return };
    let rows = (0..10).map(|i| vec![Value::Int(i % 2), Value::Int(i)]).collect();
    let df = session.from_rows(rows, ["k", "v"]).unwrap();
    let counts = df
        .group_by(["k"])
        .assign([("n", Expr::from(count().call([Expr::Wildcard]).unwrap()))])
        .unwrap();
    let rows: Vec<_> = counts.iter().unwrap().collect();
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(row.get("n").and_then(|v| v.as_i64()), Some(5));
    }
}

#[test]
fn test_duplicate_column_is_rejected() {
    let Some(session) = session() else { return };
    let df = session.from_rows(ints(&[1]), ["id"]).unwrap();
    let dup = df.assign([("id", df.col("id") + 1)]).unwrap();
    let err = dup.iter().unwrap_err();
    assert!(matches!(err, Error::DuplicateColumns(ref columns) if columns == &vec!["id".to_string()]));
    assert!(!dup.is_cached());
}

#[test]
fn test_server_errors_pass_through() {
    let Some(session) = session() else { return };
    session.run("CREATE TEMP TABLE gpdf_twice (id integer)").unwrap();
    let err = session.run("CREATE TEMP TABLE gpdf_twice (id integer)").unwrap_err();
    match err {
        Error::Database(DbError::Server { code, .. }) => assert_eq!(code.as_deref(), Some("42P07")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_composite_expand() {
    let Some(session) = session() else { return };
    let has_python = session
        .query("SELECT 1 FROM pg_language WHERE lanname = 'plpython3u'")
        .unwrap();
    if has_python.is_empty() {
        eprintln!("Skipping test: plpython3u is not installed");
        return;
    }

    let registrar = Registrar::with_session(&session);
    registrar
        .define_type("Pair", &[("val", "int"), ("next", "int")])
        .unwrap();
    let pair = registrar
        .register_source(
            r#"
            def pair(val: int) -> Pair:
                return {"val": val, "next": val + 1}
            "#,
            RegisterOptions::default(),
        )
        .unwrap();

    let df = session.from_rows(ints(&[1, 2, 3]), ["val"]).unwrap();
    let expanded = df
        .apply(|t| pair.call([t.col("val")]), true, None)
        .unwrap();
    let rows: Vec<_> = expanded.iter().unwrap().collect();
    assert_eq!(rows.len(), 3);
    for row in rows {
        let val = row.get("val").and_then(|v| v.as_i64()).unwrap();
        assert_eq!(row.get("next").and_then(|v| v.as_i64()), Some(val + 1));
    }
}
