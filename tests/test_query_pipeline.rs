use rivetdb::engine::QueryOutcome;
use rivetdb::executor::{AccessPath, IndexKind, ResultRow};
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

fn rows(engine: &mut Engine, sql: &str) -> Vec<ResultRow> {
    ok(engine, sql).result.expect("expected rows")
}

fn setup_r(engine: &mut Engine) {
    ok(engine, "CREATE TABLE r (id INT PRIMARY KEY, value INT);");
    for (id, value) in [(1, 2), (2, 3), (3, 1)] {
        ok(
            engine,
            &format!("INSERT INTO r (id, value) VALUES ({}, {});", id, value),
        );
    }
}

#[test]
fn test_join_via_primary_key_probe() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(
        &mut engine,
        "CREATE TABLE users (id INT PRIMARY KEY, name STRING);",
    );
    ok(
        &mut engine,
        "CREATE TABLE orders (id INT PRIMARY KEY, owner INT, total DOUBLE);",
    );
    ok(&mut engine, "INSERT INTO users (id, name) VALUES (1, 'ada');");
    ok(&mut engine, "INSERT INTO users (id, name) VALUES (2, 'bo');");
    ok(
        &mut engine,
        "INSERT INTO orders (id, owner, total) VALUES (10, 2, 5.5);",
    );
    ok(
        &mut engine,
        "INSERT INTO orders (id, owner, total) VALUES (11, 1, 2.5);",
    );
    ok(
        &mut engine,
        "INSERT INTO orders (id, owner, total) VALUES (12, 2, 1.0);",
    );

    let result = rows(
        &mut engine,
        "SELECT orders.id, users.name FROM orders JOIN users ON orders.owner = users.id;",
    );
    assert_eq!(result.len(), 3);
    // Driven by the orders side in ascending primary-key order
    assert_eq!(result[0].get("orders.id"), Some(&Value::Int(10)));
    assert_eq!(result[0].get("users.name"), Some(&Value::Str("bo".into())));
    assert_eq!(result[1].get("orders.id"), Some(&Value::Int(11)));
    assert_eq!(result[1].get("users.name"), Some(&Value::Str("ada".into())));
    assert_eq!(result[2].get("orders.id"), Some(&Value::Int(12)));
}

#[test]
fn test_join_with_secondary_index_and_hash_fallback_agree() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(&mut engine, "CREATE TABLE a (id INT PRIMARY KEY, k INT);");
    ok(&mut engine, "CREATE TABLE b (id INT PRIMARY KEY, k INT);");
    for id in 1..=6 {
        ok(
            &mut engine,
            &format!("INSERT INTO a (id, k) VALUES ({}, {});", id, id % 3),
        );
        ok(
            &mut engine,
            &format!("INSERT INTO b (id, k) VALUES ({}, {});", id, id % 3),
        );
    }

    let sql = "SELECT a.id, b.id FROM a JOIN b ON a.k = b.k;";
    let without_index = rows(&mut engine, sql);

    ok(&mut engine, "CREATE INDEX ix ON b(k);");
    let with_index = rows(&mut engine, sql);

    assert_eq!(without_index.len(), 12);
    assert_eq!(without_index, with_index);
}

#[test]
fn test_self_join_ordering() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();
    setup_r(&mut engine);

    let result = rows(
        &mut engine,
        "SELECT r_L.id, r_R.id FROM r JOIN r ON r_L.id = r_R.value;",
    );

    let pairs: Vec<(i64, i64)> = result
        .iter()
        .map(|row| {
            (
                row.get("r_L.id").unwrap().as_int().unwrap(),
                row.get("r_R.id").unwrap().as_int().unwrap(),
            )
        })
        .collect();
    assert_eq!(pairs, vec![(1, 3), (2, 1), (3, 2)]);
}

#[test]
fn test_self_join_requires_suffixed_references() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();
    setup_r(&mut engine);

    let msg = err(
        &mut engine,
        "SELECT r.id FROM r JOIN r ON r_L.id = r_R.value;",
    );
    assert!(msg.contains("'r'"));
}

#[test]
fn test_where_connectives() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();
    setup_r(&mut engine);

    let result = rows(&mut engine, "SELECT id FROM r WHERE id > 1 AND value > 1;");
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].get("id"), Some(&Value::Int(2)));

    // OR disables index use but both arms are honored
    let result = rows(&mut engine, "SELECT id FROM r WHERE id = 1 OR value = 1;");
    assert_eq!(result.len(), 2);
    assert_eq!(
        engine.last_access_paths()[0],
        AccessPath::FullScan {
            table: "r".to_string()
        }
    );

    let result = rows(&mut engine, "SELECT id FROM r WHERE value != 2;");
    assert_eq!(result.len(), 2);
}

#[test]
fn test_grouped_aggregation_with_having() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();
    setup_r(&mut engine);

    let result = rows(
        &mut engine,
        "SELECT id, SUM(value) FROM r WHERE value < 3 GROUP BY id HAVING SUM(value) > 1;",
    );
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].get("id"), Some(&Value::Int(1)));
    assert_eq!(result[0].get("SUM(value)"), Some(&Value::Int(2)));
}

#[test]
fn test_aggregates_over_whole_table() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(
        &mut engine,
        "CREATE TABLE m (id INT PRIMARY KEY, score DOUBLE, tag STRING);",
    );
    for (id, score, tag) in [(1, 1.25, "b"), (2, 2.125, "a"), (3, 0.5, "c")] {
        ok(
            &mut engine,
            &format!(
                "INSERT INTO m (id, score, tag) VALUES ({}, {}, '{}');",
                id, score, tag
            ),
        );
    }

    let result = rows(
        &mut engine,
        "SELECT MIN(tag), MAX(score), SUM(score) FROM m;",
    );
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].get("MIN(tag)"), Some(&Value::Str("a".into())));
    // Double aggregate outputs are rounded to two decimal places
    assert_eq!(result[0].get("MAX(score)"), Some(&Value::Double(2.13)));
    assert_eq!(result[0].get("SUM(score)"), Some(&Value::Double(3.88)));
}

#[test]
fn test_aggregates_over_empty_input_yield_no_rows() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();
    ok(&mut engine, "CREATE TABLE e (id INT PRIMARY KEY);");

    let result = rows(&mut engine, "SELECT SUM(id) FROM e;");
    assert!(result.is_empty());
}

#[test]
fn test_group_output_order_and_order_by() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(&mut engine, "CREATE TABLE g (id INT PRIMARY KEY, k INT, v INT);");
    for (id, k, v) in [(1, 2, 10), (2, 1, 20), (3, 2, 30), (4, 1, 40)] {
        ok(
            &mut engine,
            &format!("INSERT INTO g (id, k, v) VALUES ({}, {}, {});", id, k, v),
        );
    }

    // Without ORDER BY groups appear in first-seen (upstream) order
    let result = rows(&mut engine, "SELECT k, SUM(v) FROM g GROUP BY k;");
    assert_eq!(result[0].get("k"), Some(&Value::Int(2)));
    assert_eq!(result[0].get("SUM(v)"), Some(&Value::Int(40)));
    assert_eq!(result[1].get("k"), Some(&Value::Int(1)));
    assert_eq!(result[1].get("SUM(v)"), Some(&Value::Int(60)));

    let result = rows(&mut engine, "SELECT k, MAX(v) FROM g GROUP BY k ORDER BY k ASC;");
    assert_eq!(result[0].get("k"), Some(&Value::Int(1)));
    assert_eq!(result[1].get("k"), Some(&Value::Int(2)));
}

#[test]
fn test_order_by_is_stable_across_keys() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(&mut engine, "CREATE TABLE s (id INT PRIMARY KEY, k INT);");
    for (id, k) in [(1, 2), (2, 1), (3, 2), (4, 1)] {
        ok(
            &mut engine,
            &format!("INSERT INTO s (id, k) VALUES ({}, {});", id, k),
        );
    }

    // Ties on k keep ascending-pk upstream order
    let result = rows(&mut engine, "SELECT id FROM s ORDER BY k ASC;");
    let got: Vec<i64> = result
        .iter()
        .map(|row| row.get("id").unwrap().as_int().unwrap())
        .collect();
    assert_eq!(got, vec![2, 4, 1, 3]);

    let result = rows(&mut engine, "SELECT id FROM s ORDER BY k DESC, id DESC;");
    let got: Vec<i64> = result
        .iter()
        .map(|row| row.get("id").unwrap().as_int().unwrap())
        .collect();
    assert_eq!(got, vec![3, 1, 4, 2]);
}

#[test]
fn test_index_changes_access_path_not_results() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(&mut engine, "CREATE TABLE t (id INT PRIMARY KEY, k INT);");
    for id in 0..300 {
        ok(
            &mut engine,
            &format!("INSERT INTO t (id, k) VALUES ({}, {});", id, id % 50),
        );
    }

    let before = rows(&mut engine, "SELECT * FROM t WHERE k = 42;");
    assert!(matches!(
        engine.last_access_paths()[0],
        AccessPath::FullScan { .. }
    ));

    ok(&mut engine, "CREATE INDEX ix ON t(k);");

    let after = rows(&mut engine, "SELECT * FROM t WHERE k = 42;");
    match &engine.last_access_paths()[0] {
        AccessPath::IndexRange { column, index, .. } => {
            assert_eq!(column, "k");
            assert_eq!(*index, IndexKind::Secondary);
        }
        other => panic!("expected IndexRange, got {:?}", other),
    }

    assert_eq!(before.len(), 6);
    assert_eq!(before, after);
}

#[test]
fn test_binder_error_surface() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(&mut engine, "CREATE TABLE a (id INT PRIMARY KEY, k INT);");
    ok(&mut engine, "CREATE TABLE b (id INT PRIMARY KEY, k INT);");
    ok(&mut engine, "INSERT INTO a (id, k) VALUES (1, 1);");

    let msg = err(&mut engine, "SELECT nope FROM a;");
    assert!(msg.contains("nope"));

    let msg = err(&mut engine, "SELECT k FROM a JOIN b ON a.id = b.id;");
    assert!(msg.contains("ambiguous"));

    let msg = err(&mut engine, "SELECT id FROM a WHERE k = 'x';");
    assert!(msg.contains("Type error"));

    let msg = err(&mut engine, "SELECT id, SUM(k) FROM a;");
    assert!(msg.contains("Aggregation"));

    let msg = err(&mut engine, "SELECT id FROM a GROUP BY k;");
    assert!(msg.contains("Aggregation"));

    let msg = err(&mut engine, "SELECT id FROM a WHERE SUM(k) > 1;");
    assert!(msg.contains("Aggregation"));

    let msg = err(&mut engine, "SELECT SUM(k) FROM a HAVING id > 1;");
    assert!(msg.contains("Aggregation"));
}

#[test]
fn test_sum_on_string_rejected() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(
        &mut engine,
        "CREATE TABLE t (id INT PRIMARY KEY, tag STRING);",
    );
    let msg = err(&mut engine, "SELECT SUM(tag) FROM t;");
    assert!(msg.contains("Type error"));
}

#[test]
fn test_projection_order_preserved() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(dir.path()).unwrap();

    ok(
        &mut engine,
        "CREATE TABLE t (id INT PRIMARY KEY, a INT, b INT);",
    );
    ok(&mut engine, "INSERT INTO t (id, a, b) VALUES (1, 2, 3);");

    let result = rows(&mut engine, "SELECT b, id, a FROM t;");
    let columns: Vec<&str> = result[0].columns().collect();
    assert_eq!(columns, vec!["b", "id", "a"]);
}
