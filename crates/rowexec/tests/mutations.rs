use rowexec::ast::build::*;
use rowexec::ast::{
    Assignment, ColumnRef, ColumnSchema, ConflictAction, CreateTable, DataType, Delete, Expr,
    Insert, InsertSource, ObjectName, OnConflict, Query, SelectItem, Statement, TableSchema,
    Update, ValueOrDefault,
};
use rowexec::row::EXCLUDED_ALIAS;
use rowexec::store::ChangeKind;
use rowexec::{
    Engine, ExecError, ExecutionConfig, QueryOptions, QueryResult, ScalarValue, record,
};

fn users() -> TableSchema {
    TableSchema::new(
        "users",
        vec![
            ColumnSchema::new("id", DataType::Int),
            ColumnSchema::new("name", DataType::Text),
            ColumnSchema::new("visits", DataType::Int).with_default(lit(0)),
        ],
    )
    .with_primary_key(["id"])
}

async fn engine() -> Engine {
    logutil::init_test();
    let engine = Engine::in_memory(ExecutionConfig::default());
    engine
        .query(
            &Statement::CreateTable(CreateTable {
                schema: users(),
                if_not_exists: false,
                temporary: false,
            }),
            QueryOptions::default(),
        )
        .await
        .unwrap();
    engine
}

fn insert(rows: &[(i64, &str)]) -> Insert {
    Insert {
        table: ObjectName::new("users"),
        alias: None,
        columns: vec!["id".to_string(), "name".to_string()],
        source: InsertSource::Values(
            rows.iter()
                .map(|(id, name)| {
                    vec![
                        ValueOrDefault::Expr(lit(*id)),
                        ValueOrDefault::Expr(lit(*name)),
                    ]
                })
                .collect(),
        ),
        on_conflict: None,
        returning: Vec::new(),
        origin_schemas: vec![users()],
    }
}

fn set(name: &str, value: Expr) -> Assignment {
    Assignment {
        target: ColumnRef {
            relation: None,
            name: name.to_string(),
        },
        value: ValueOrDefault::Expr(value),
    }
}

async fn run(engine: &Engine, statement: Statement) -> QueryResult {
    engine
        .query(&statement, QueryOptions::default())
        .await
        .unwrap()
}

async fn all_users(engine: &Engine) -> Vec<rowexec::Record> {
    let mut select = select(vec![SelectItem::Wildcard], vec![from(table("users"))]);
    select.origin_schemas = vec![users()];
    let mut query: Query = select.into();
    query.order_by = vec![asc(col("id"))];
    run(engine, Statement::Query(query)).await.into_rows()
}

#[tokio::test]
async fn on_conflict_do_update_uses_excluded() {
    let engine = engine().await;
    run(&engine, Statement::Insert(insert(&[(1, "a")]))).await;

    let mut upsert = insert(&[(1, "b")]);
    upsert.on_conflict = Some(OnConflict {
        target: vec!["id".to_string()],
        action: ConflictAction::DoUpdate {
            assignments: vec![
                set("name", qcol(EXCLUDED_ALIAS, "name")),
                set("visits", add(col("visits"), lit(1))),
            ],
            selection: None,
        },
    });
    let result = run(&engine, Statement::Insert(upsert)).await;
    assert_eq!(QueryResult::RowCount(1), result);

    assert_eq!(
        vec![record([
            ("id", ScalarValue::Int64(1)),
            ("name", ScalarValue::from("b")),
            ("visits", ScalarValue::Int64(1)),
        ])],
        all_users(&engine).await
    );
}

#[tokio::test]
async fn mysql_values_function_in_upsert() {
    let engine = engine().await;
    run(&engine, Statement::Insert(insert(&[(1, "a")]))).await;

    // INSERT ... ON DUPLICATE KEY UPDATE name = VALUES(name)
    let mut upsert = insert(&[(1, "c"), (2, "d")]);
    upsert.on_conflict = Some(OnConflict {
        target: Vec::new(),
        action: ConflictAction::DoUpdate {
            assignments: vec![set("name", func("values", vec![col("name")]))],
            selection: None,
        },
    });
    let result = engine
        .query(
            &Statement::Insert(upsert),
            QueryOptions::default().with_dialect(rowexec::Dialect::MySql),
        )
        .await
        .unwrap();
    assert_eq!(QueryResult::RowCount(2), result);

    let names: Vec<_> = all_users(&engine)
        .await
        .into_iter()
        .map(|r| r["name"].clone())
        .collect();
    assert_eq!(vec![ScalarValue::from("c"), ScalarValue::from("d")], names);
}

#[tokio::test]
async fn duplicate_insert_without_handler_fails() {
    let engine = engine().await;
    run(&engine, Statement::Insert(insert(&[(1, "a")]))).await;
    let err = engine
        .query(&Statement::Insert(insert(&[(1, "a")])), QueryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::Conflict { .. }));
}

#[tokio::test]
async fn returning_and_row_counts() {
    let engine = engine().await;

    let mut stmt = insert(&[(1, "a"), (2, "b"), (3, "c")]);
    stmt.returning = vec![item(col("id")), item_as(col("visits"), "v")];
    let result = run(&engine, Statement::Insert(stmt)).await;
    assert_eq!(vec!["id", "v"], result.columns());
    assert_eq!(3, result.row_count());
    assert_eq!(ScalarValue::Int64(0), result.rows()[2]["v"]);

    let update = Update {
        table: from(table("users")),
        assignments: vec![set("visits", lit(5))],
        from: Vec::new(),
        selection: Some(gt(col("id"), lit(1))),
        returning: Vec::new(),
        origin_schemas: vec![users()],
    };
    assert_eq!(
        QueryResult::RowCount(2),
        run(&engine, Statement::Update(update)).await
    );

    let delete = Delete {
        targets: Vec::new(),
        from: vec![from(table("users"))],
        using: Vec::new(),
        selection: Some(eq(col("visits"), lit(5))),
        returning: vec![item(col("name"))],
        origin_schemas: vec![users()],
    };
    let result = run(&engine, Statement::Delete(delete)).await;
    assert_eq!(
        vec![record([("name", "b")]), record([("name", "c")])],
        result.rows()
    );
    assert_eq!(1, all_users(&engine).await.len());
}

#[tokio::test]
async fn insert_select_from_same_table() {
    let engine = engine().await;
    run(&engine, Statement::Insert(insert(&[(1, "a"), (2, "b")]))).await;

    let mut source = select(
        vec![item(add(col("id"), lit(10))), item(col("name"))],
        vec![from(table("users"))],
    );
    source.origin_schemas = vec![users()];
    let stmt = Insert {
        source: InsertSource::Query(Box::new(source.into())),
        ..insert(&[])
    };
    let result = run(&engine, Statement::Insert(stmt)).await;
    assert_eq!(QueryResult::RowCount(2), result);
    assert_eq!(4, all_users(&engine).await.len());
}

#[tokio::test]
async fn change_batch_per_call() {
    let engine = engine().await;
    let mut batches = engine.subscribe();

    run(&engine, Statement::Insert(insert(&[(1, "a"), (2, "b")]))).await;
    let update = Update {
        table: from(table("users")),
        assignments: vec![set("name", lit("z"))],
        from: Vec::new(),
        selection: None,
        returning: Vec::new(),
        origin_schemas: vec![users()],
    };
    run(&engine, Statement::Update(update)).await;

    let inserted = batches.recv().await.unwrap();
    assert_eq!(2, inserted.events.len());
    assert!(inserted.events.iter().all(|e| e.kind == ChangeKind::Insert));

    let updated = batches.recv().await.unwrap();
    assert_ne!(inserted.tx_id, updated.tx_id);
    assert_eq!(2, updated.events.len());
    let event = &updated.events[0];
    assert_eq!(ChangeKind::Update, event.kind);
    assert_eq!(Some(ScalarValue::from("a")), event.old.as_ref().map(|r| r["name"].clone()));
    assert_eq!(Some(ScalarValue::from("z")), event.new.as_ref().map(|r| r["name"].clone()));
}

#[tokio::test]
async fn change_batch_is_complete_for_large_statements() {
    let engine = engine().await;
    let mut batches = engine.subscribe();

    let names: Vec<String> = (0..1200).map(|i| format!("user{i}")).collect();
    let rows: Vec<(i64, &str)> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (i as i64, name.as_str()))
        .collect();
    let result = run(&engine, Statement::Insert(insert(&rows))).await;
    assert_eq!(QueryResult::RowCount(1200), result);

    let batch = batches.recv().await.unwrap();
    assert_eq!(1200, batch.events.len());
    assert!(batch.events.iter().all(|e| e.tx_id == Some(batch.tx_id)));
}

#[tokio::test]
async fn temporary_tables_not_implemented() {
    let engine = engine().await;
    let err = engine
        .query(
            &Statement::CreateTable(CreateTable {
                schema: TableSchema::new("tmp", vec![ColumnSchema::new("a", DataType::Int)]),
                if_not_exists: false,
                temporary: true,
            }),
            QueryOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::NotImplemented(_)));
}
