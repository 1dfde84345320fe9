use relief_db::{create_pool, run_migrations, schema_version, DbRuntimeSettings};

#[test]
fn queued_rows_and_schema_version_survive_reopen() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("client.db");
    let path = path.to_str().expect("utf-8 path");

    {
        let pool = create_pool(path, DbRuntimeSettings::default()).expect("pool");
        let conn = pool.get().expect("connection");
        run_migrations(&conn).expect("migrations");
        conn.execute(
            "INSERT INTO mutation_queue (id, endpoint, input_json, enqueued_at)
             VALUES ('m-1', 'supply.approve', '{\"id\":\"RS-9\"}', 1)",
            [],
        )
        .expect("insert");
    }

    let pool = create_pool(path, DbRuntimeSettings::default()).expect("reopen");
    let conn = pool.get().expect("connection");
    assert_eq!(schema_version(&conn).expect("version"), Some(1));
    assert_eq!(run_migrations(&conn).expect("migrations"), 0);

    let (endpoint, input): (String, String) = conn
        .query_row(
            "SELECT endpoint, input_json FROM mutation_queue WHERE id = 'm-1'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("row persisted");
    assert_eq!(endpoint, "supply.approve");
    assert_eq!(input, r#"{"id":"RS-9"}"#);
}

#[test]
fn duplicate_mutation_ids_are_rejected() {
    let pool = create_pool(":memory:", DbRuntimeSettings::default()).expect("pool");
    let conn = pool.get().expect("connection");
    run_migrations(&conn).expect("migrations");

    let insert = "INSERT INTO mutation_queue (id, endpoint, input_json, enqueued_at)
                  VALUES ('dup', 'task.assign', '{}', 1)";
    conn.execute(insert, []).expect("first insert");
    assert!(conn.execute(insert, []).is_err());
}
