use rivetdb::engine::QueryOutcome;
use rivetdb::storage::Value;
use rivetdb::Engine;
use tempfile::tempdir;

fn ok(engine: &mut Engine, sql: &str) -> QueryOutcome {
    let outcome = engine.execute(sql);
    assert!(
        outcome.error.is_none(),
        "'{}' failed: {:?}",
        sql,
        outcome.error
    );
    outcome
}

fn err(engine: &mut Engine, sql: &str) -> String {
    engine
        .execute(sql)
        .error
        .unwrap_or_else(|| panic!("'{}' unexpectedly succeeded", sql))
}

fn ids(engine: &mut Engine, sql: &str) -> Vec<i64> {
    ok(engine, sql)
        .result
        .unwrap()
        .iter()
        .map(|row| row.get("id").unwrap().as_int().unwrap())
        .collect()
}

#[test]
fn test_duplicate_primary_key_rejected() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(
        &mut engine,
        "CREATE TABLE u (id INT PRIMARY KEY, name STRING);",
    );
    ok(&mut engine, "INSERT INTO u (id, name) VALUES (1, 'a');");

    let msg = err(&mut engine, "INSERT INTO u (id, name) VALUES (1, 'b');");
    assert!(msg.contains("primary key"));

    let rows = ok(&mut engine, "SELECT * FROM u;").result.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::Str("a".into())));
}

#[test]
fn test_insert_validates_types_and_arity() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(
        &mut engine,
        "CREATE TABLE t (id INT PRIMARY KEY, score DOUBLE, tag STRING);",
    );

    let msg = err(&mut engine, "INSERT INTO t (id, score, tag) VALUES (1, 2.5);");
    assert!(msg.contains("Type error"));

    // An integer literal is not a DOUBLE
    let msg = err(&mut engine, "INSERT INTO t (id, score, tag) VALUES (1, 2, 'x');");
    assert!(msg.contains("Type error"));

    // Every column needs a value
    let msg = err(&mut engine, "INSERT INTO t (id, score) VALUES (1, 2.5);");
    assert!(msg.contains("Type error"));

    let msg = err(&mut engine, "INSERT INTO t (id, score, oops) VALUES (1, 2.5, 'x');");
    assert!(msg.contains("oops"));

    // Column list may reorder
    ok(
        &mut engine,
        "INSERT INTO t (tag, id, score) VALUES ('x', 1, 2.5);",
    );
    let rows = ok(&mut engine, "SELECT * FROM t;").result.unwrap();
    assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
    assert_eq!(rows[0].get("score"), Some(&Value::Double(2.5)));
    assert_eq!(rows[0].get("tag"), Some(&Value::Str("x".into())));
}

#[test]
fn test_foreign_key_checked_on_insert() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(&mut engine, "CREATE TABLE p (id INT PRIMARY KEY);");
    ok(
        &mut engine,
        "CREATE TABLE c (id INT PRIMARY KEY, pid INT FOREIGN KEY REFERENCES p(id));",
    );

    let msg = err(&mut engine, "INSERT INTO c (id, pid) VALUES (1, 7);");
    assert!(msg.contains("foreign key"));

    ok(&mut engine, "INSERT INTO p (id) VALUES (7);");
    ok(&mut engine, "INSERT INTO c (id, pid) VALUES (1, 7);");
}

#[test]
fn test_select_star_ascending_pk_order() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(&mut engine, "CREATE TABLE t (id INT PRIMARY KEY, k INT);");
    for id in [5, 1, 4, 2, 3] {
        ok(
            &mut engine,
            &format!("INSERT INTO t (id, k) VALUES ({}, {});", id, 10 * id),
        );
    }

    assert_eq!(ids(&mut engine, "SELECT * FROM t;"), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_update_rewrites_rows_and_indexes() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(&mut engine, "CREATE TABLE t (id INT PRIMARY KEY, k INT);");
    ok(&mut engine, "CREATE INDEX ix ON t(k);");
    for id in 1..=4 {
        ok(
            &mut engine,
            &format!("INSERT INTO t (id, k) VALUES ({}, {});", id, id),
        );
    }

    let outcome = ok(&mut engine, "UPDATE t SET k = 99 WHERE id > 2;");
    assert_eq!(outcome.rows_affected, Some(2));

    // The index sees the new values and no longer the old ones
    assert_eq!(ids(&mut engine, "SELECT * FROM t WHERE k = 99;"), vec![3, 4]);
    assert!(engine.last_access_paths()[0].is_index_range());
    assert_eq!(ids(&mut engine, "SELECT * FROM t WHERE k = 3;"), Vec::<i64>::new());
}

#[test]
fn test_update_primary_key_rules() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(&mut engine, "CREATE TABLE p (id INT PRIMARY KEY);");
    ok(
        &mut engine,
        "CREATE TABLE c (id INT PRIMARY KEY, pid INT FOREIGN KEY REFERENCES p(id));",
    );
    ok(&mut engine, "INSERT INTO p (id) VALUES (1);");
    ok(&mut engine, "INSERT INTO p (id) VALUES (2);");

    // Collision with an existing row
    let msg = err(&mut engine, "UPDATE p SET id = 2 WHERE id = 1;");
    assert!(msg.contains("primary key"));

    // Moving to a fresh value is allowed while unreferenced
    ok(&mut engine, "UPDATE p SET id = 3 WHERE id = 1;");
    assert_eq!(ids(&mut engine, "SELECT * FROM p;"), vec![2, 3]);

    // Once referenced, the PK is pinned
    ok(&mut engine, "INSERT INTO c (id, pid) VALUES (1, 3);");
    let msg = err(&mut engine, "UPDATE p SET id = 4 WHERE id = 3;");
    assert!(msg.contains("referenced"));
}

#[test]
fn test_update_foreign_key_value_must_exist() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(&mut engine, "CREATE TABLE p (id INT PRIMARY KEY);");
    ok(
        &mut engine,
        "CREATE TABLE c (id INT PRIMARY KEY, pid INT FOREIGN KEY REFERENCES p(id));",
    );
    ok(&mut engine, "INSERT INTO p (id) VALUES (1);");
    ok(&mut engine, "INSERT INTO c (id, pid) VALUES (1, 1);");

    let msg = err(&mut engine, "UPDATE c SET pid = 9 WHERE id = 1;");
    assert!(msg.contains("foreign key"));

    // No matched rows, no constraint to break
    let outcome = ok(&mut engine, "UPDATE c SET pid = 9 WHERE id = 42;");
    assert_eq!(outcome.rows_affected, Some(0));
}

#[test]
fn test_delete_respects_references() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(&mut engine, "CREATE TABLE p (id INT PRIMARY KEY);");
    ok(
        &mut engine,
        "CREATE TABLE c (id INT PRIMARY KEY, pid INT FOREIGN KEY REFERENCES p(id));",
    );
    for id in 1..=3 {
        ok(&mut engine, &format!("INSERT INTO p (id) VALUES ({});", id));
    }
    ok(&mut engine, "INSERT INTO c (id, pid) VALUES (1, 2);");

    // Row 2 is referenced; deleting everything must refuse up front
    let msg = err(&mut engine, "DELETE FROM p;");
    assert!(msg.contains("foreign key"));
    assert_eq!(ids(&mut engine, "SELECT * FROM p;"), vec![1, 2, 3]);

    // Unreferenced rows go
    let outcome = ok(&mut engine, "DELETE FROM p WHERE id = 1;");
    assert_eq!(outcome.rows_affected, Some(1));

    ok(&mut engine, "DELETE FROM c;");
    let outcome = ok(&mut engine, "DELETE FROM p;");
    assert_eq!(outcome.rows_affected, Some(2));
}

#[test]
fn test_delete_removes_index_entries() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(&mut engine, "CREATE TABLE t (id INT PRIMARY KEY, k INT);");
    ok(&mut engine, "CREATE INDEX ix ON t(k);");
    for id in 1..=4 {
        ok(
            &mut engine,
            &format!("INSERT INTO t (id, k) VALUES ({}, {});", id, id % 2),
        );
    }

    ok(&mut engine, "DELETE FROM t WHERE id < 3;");

    // Full scan and index scan agree after the delete
    assert_eq!(ids(&mut engine, "SELECT * FROM t;"), vec![3, 4]);
    assert_eq!(ids(&mut engine, "SELECT * FROM t WHERE k = 1;"), vec![3]);
    assert_eq!(ids(&mut engine, "SELECT * FROM t WHERE k = 0;"), vec![4]);
}

#[test]
fn test_rows_survive_restart() {
    let dir = tempdir().unwrap();
    {
        let mut engine = Engine::open(dir.path()).unwrap();
        ok(
            &mut engine,
            "CREATE TABLE t (id INT PRIMARY KEY, tag STRING);",
        );
        ok(&mut engine, "INSERT INTO t (id, tag) VALUES (2, 'b');");
        ok(&mut engine, "INSERT INTO t (id, tag) VALUES (1, 'a');");
        ok(&mut engine, "UPDATE t SET tag = 'z' WHERE id = 2;");
    }

    let mut engine = Engine::open(dir.path()).unwrap();
    let rows = ok(&mut engine, "SELECT * FROM t;").result.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("tag"), Some(&Value::Str("a".into())));
    assert_eq!(rows[1].get("tag"), Some(&Value::Str("z".into())));
}
