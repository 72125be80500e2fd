//! End-to-end scenarios through the public Database API

use lyradb::{Database, DataType, ErrorCode, Value};

fn open_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    (dir, db)
}

fn seeded() -> (tempfile::TempDir, Database) {
    let (dir, mut db) = open_db();
    db.execute(
        "CREATE TABLE employees (emp_id BIGINT NOT NULL, dept_id BIGINT, salary DOUBLE)",
    )
    .unwrap();
    db.execute("CREATE TABLE departments (dept_id BIGINT, name VARCHAR)")
        .unwrap();
    db.execute(
        "INSERT INTO employees VALUES \
         (1, 10, 80000.0), (2, 10, 75000.0), (3, 10, 95000.0), \
         (4, 20, 60000.0), (5, 30, 55000.0)",
    )
    .unwrap();
    db.execute("INSERT INTO departments VALUES (10, 'engineering'), (20, 'sales'), (40, 'legal')")
        .unwrap();
    (dir, db)
}

#[test]
fn inner_join_returns_matching_pairs() {
    let (_dir, mut db) = seeded();
    let result = db
        .query(
            "SELECT e.emp_id, d.name FROM employees e \
             JOIN departments d ON e.dept_id = d.dept_id",
        )
        .unwrap();

    let mut pairs: Vec<(i64, String)> = result
        .rows
        .iter()
        .map(|r| (r[0].to_i64(), r[1].to_text()))
        .collect();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            (1, "engineering".to_string()),
            (2, "engineering".to_string()),
            (3, "engineering".to_string()),
            (4, "sales".to_string()),
        ]
    );
}

#[test]
fn left_join_keeps_unmatched_employee() {
    let (_dir, mut db) = seeded();
    let result = db
        .query(
            "SELECT e.emp_id, d.name FROM employees e \
             LEFT JOIN departments d ON e.dept_id = d.dept_id",
        )
        .unwrap();
    assert_eq!(result.row_count(), 5);

    let orphan: Vec<_> = result
        .rows
        .iter()
        .filter(|r| r[0] == Value::Integer(5))
        .collect();
    assert_eq!(orphan.len(), 1);
    assert_eq!(orphan[0][1], Value::Null, "unmatched row must carry NULL");
}

#[test]
fn group_by_having_filters_departments() {
    let (_dir, mut db) = open_db();
    db.execute("CREATE TABLE t (dept VARCHAR, salary BIGINT)").unwrap();
    db.execute(
        "INSERT INTO t VALUES ('eng', 80000), ('eng', 75000), ('eng', 95000), \
         ('sales', 60000), ('sales', 55000)",
    )
    .unwrap();

    let result = db
        .query("SELECT dept FROM t GROUP BY dept HAVING COUNT(*) > 2")
        .unwrap();
    assert_eq!(result.row_count(), 1);
    assert_eq!(result.rows[0][0], Value::Text("eng".into()));
}

#[test]
fn aggregates_skip_nulls() {
    let (_dir, mut db) = open_db();
    db.execute("CREATE TABLE t (x BIGINT)").unwrap();
    db.execute("INSERT INTO t VALUES (10), (NULL), (20), (NULL)").unwrap();

    let result = db
        .query("SELECT COUNT(*), COUNT(x), SUM(x), AVG(x), MIN(x), MAX(x) FROM t")
        .unwrap();
    let row = &result.rows[0];
    assert_eq!(row[0], Value::Integer(4));
    assert_eq!(row[1], Value::Integer(2));
    assert_eq!(row[2], Value::Integer(30));
    assert_eq!(row[3], Value::Real(15.0));
    assert_eq!(row[4], Value::Integer(10));
    assert_eq!(row[5], Value::Integer(20));
}

#[test]
fn result_cache_invalidated_by_insert() {
    let (_dir, mut db) = seeded();

    let before = db.query("SELECT COUNT(*) FROM employees").unwrap();
    assert_eq!(before.rows[0][0], Value::Integer(5));

    db.execute("INSERT INTO employees VALUES (6, 20, 58000.0)").unwrap();

    // The second select must see the new count, not the cached one.
    let after = db.query("SELECT COUNT(*) FROM employees").unwrap();
    assert_eq!(after.rows[0][0], Value::Integer(6));
}

#[test]
fn index_and_scan_agree_for_all_operators() {
    let (_dir, mut db) = open_db();
    db.execute("CREATE TABLE nums (n BIGINT)").unwrap();
    let values: Vec<String> = (0..200).map(|i| format!("({})", i % 50)).collect();
    db.execute(&format!("INSERT INTO nums VALUES {}", values.join(", ")))
        .unwrap();

    let collect = |db: &mut Database, sql: &str| -> Vec<i64> {
        let mut out: Vec<i64> = db
            .query(sql)
            .unwrap()
            .rows
            .iter()
            .map(|r| r[0].to_i64())
            .collect();
        out.sort_unstable();
        out
    };

    let queries = [
        "SELECT n FROM nums WHERE n = 7",
        "SELECT n FROM nums WHERE n < 5",
        "SELECT n FROM nums WHERE n > 45",
        "SELECT n FROM nums WHERE n >= 48",
        "SELECT n FROM nums WHERE n <= 1",
    ];

    let unindexed: Vec<Vec<i64>> = queries.iter().map(|q| collect(&mut db, q)).collect();
    db.execute("CREATE INDEX n_idx ON nums (n)").unwrap();
    // Force re-execution through the index path.
    db.clear_result_cache();
    let indexed: Vec<Vec<i64>> = queries.iter().map(|q| collect(&mut db, q)).collect();

    assert_eq!(unindexed, indexed, "index-driven results must match scans");
}

#[test]
fn intersected_indexes_agree_with_scan() {
    let (_dir, mut db) = open_db();
    db.execute("CREATE TABLE points (x BIGINT, y BIGINT)").unwrap();
    let values: Vec<String> = (0..400)
        .map(|i| format!("({}, {})", i % 40, (i * 7) % 40))
        .collect();
    db.execute(&format!("INSERT INTO points VALUES {}", values.join(", ")))
        .unwrap();

    let sql = "SELECT x, y FROM points WHERE x = 5 AND y > 30";
    let scanned = db.query(sql).unwrap().rows.clone();

    db.execute("CREATE INDEX x_idx ON points (x)").unwrap();
    db.execute("CREATE INDEX y_idx ON points (y)").unwrap();
    db.clear_result_cache();
    let intersected = db.query(sql).unwrap().rows.clone();

    assert_eq!(scanned, intersected, "intersection must match the scan");
    assert!(!scanned.is_empty());
}

#[test]
fn order_by_limit_offset() {
    let (_dir, mut db) = seeded();
    let result = db
        .query("SELECT emp_id FROM employees ORDER BY salary DESC LIMIT 2 OFFSET 1")
        .unwrap();
    assert_eq!(result.row_count(), 2);
    // Salaries desc: 95k (3), 80k (1), 75k (2): offset 1 gives 1 then 2.
    assert_eq!(result.rows[0][0], Value::Integer(1));
    assert_eq!(result.rows[1][0], Value::Integer(2));
}

#[test]
fn distinct_dedupes() {
    let (_dir, mut db) = seeded();
    let result = db.query("SELECT DISTINCT dept_id FROM employees").unwrap();
    assert_eq!(result.row_count(), 3);
}

#[test]
fn update_then_select_sees_new_values() {
    let (_dir, mut db) = seeded();
    let changed = db
        .execute("UPDATE employees SET dept_id = 20 WHERE emp_id = 5")
        .unwrap();
    assert_eq!(changed, 1);
    let result = db
        .query("SELECT COUNT(*) FROM employees WHERE dept_id = 20")
        .unwrap();
    assert_eq!(result.rows[0][0], Value::Integer(2));
}

#[test]
fn delete_hides_rows_and_compact_rewrites() {
    let (_dir, mut db) = seeded();
    db.execute("DELETE FROM employees WHERE salary < 60000.0").unwrap();
    let result = db.query("SELECT COUNT(*) FROM employees").unwrap();
    assert_eq!(result.rows[0][0], Value::Integer(4));

    db.compact().unwrap();
    let result = db.query("SELECT COUNT(*) FROM employees").unwrap();
    assert_eq!(result.rows[0][0], Value::Integer(4));
}

#[test]
fn flush_then_validate_on_disk_files() {
    let (_dir, mut db) = seeded();
    db.flush().unwrap();
    let rows = db.read_flushed_rows("employees", 0, 5).unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[4][0], Value::Integer(5));
}

#[test]
fn scalar_functions_in_queries() {
    let (_dir, mut db) = seeded();
    let result = db
        .query("SELECT UPPER(name), LENGTH(name) FROM departments WHERE dept_id = 10")
        .unwrap();
    assert_eq!(result.rows[0][0], Value::Text("ENGINEERING".into()));
    assert_eq!(result.rows[0][1], Value::Integer(11));
}

#[test]
fn like_and_in_predicates() {
    let (_dir, mut db) = seeded();
    let result = db
        .query("SELECT name FROM departments WHERE name LIKE '%eng%'")
        .unwrap();
    assert_eq!(result.row_count(), 1);

    let result = db
        .query("SELECT COUNT(*) FROM employees WHERE dept_id IN (10, 30)")
        .unwrap();
    assert_eq!(result.rows[0][0], Value::Integer(4));
}

#[test]
fn division_by_zero_is_an_error() {
    let (_dir, mut db) = seeded();
    let err = db.query("SELECT salary / 0 FROM employees").unwrap_err();
    assert_eq!(err.code(), ErrorCode::Arithmetic);
}

#[test]
fn parse_errors_carry_position() {
    let (_dir, mut db) = open_db();
    let err = db.query("SELECT FROM WHERE").unwrap_err();
    assert_eq!(err.code(), ErrorCode::Parse);
    assert!(err.to_string().contains("line 1"));
}

#[test]
fn ddl_lifecycle() {
    let (_dir, mut db) = open_db();
    db.create_table(
        "t",
        lyradb::Schema::new(vec![
            lyradb::ColumnDef::not_null("id", DataType::Int64),
            lyradb::ColumnDef::new("tag", DataType::Text),
        ])
        .unwrap(),
    )
    .unwrap();
    assert_eq!(db.list_tables(), vec!["t".to_string()]);

    // Duplicate table conflicts.
    let err = db.execute("CREATE TABLE t (x INT)").unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);

    db.execute("CREATE INDEX tag_idx ON t (tag) USING BITMAP").unwrap();
    assert!(db.index_manager().exists("tag_idx"));

    db.execute("DROP INDEX tag_idx").unwrap();
    db.execute("DROP TABLE t").unwrap();
    assert!(db.list_tables().is_empty());
    assert_eq!(db.execute("DROP TABLE IF EXISTS t").unwrap(), 0);
}

#[test]
fn cancellation_stops_queries() {
    let (_dir, mut db) = seeded();
    let cancel = db.cancellation();
    cancel.cancel();
    let err = db.query("SELECT * FROM employees").unwrap_err();
    assert_eq!(err.code(), ErrorCode::Interrupted);
    cancel.reset();
    assert!(db.query("SELECT * FROM employees").is_ok());
}

#[test]
fn right_and_full_joins() {
    let (_dir, mut db) = seeded();

    // RIGHT JOIN keeps the department with no employees.
    let result = db
        .query(
            "SELECT e.emp_id, d.name FROM employees e \
             RIGHT JOIN departments d ON e.dept_id = d.dept_id",
        )
        .unwrap();
    let legal: Vec<_> = result
        .rows
        .iter()
        .filter(|r| r.iter().any(|v| *v == Value::Text("legal".into())))
        .collect();
    assert_eq!(legal.len(), 1);

    // FULL JOIN keeps both unmatched sides.
    let result = db
        .query(
            "SELECT e.emp_id, d.name FROM employees e \
             FULL JOIN departments d ON e.dept_id = d.dept_id",
        )
        .unwrap();
    // 4 matches + employee 5 unmatched + legal unmatched.
    assert_eq!(result.row_count(), 6);
}
