#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use serde_json::{Map, Value as JsonValue, json};
use servosaur_storage::{
    Conjunction, EngineConfig, FactoryRegistry, FieldSpec, Filter, Instruction, KeyPolicy,
    LedgerAction, MemoryPool, NOT_NULL, Payload, Schema, StepOutcome, StorageEngine,
    StorageError, TableDef,
};

fn object(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn objects(value: JsonValue) -> Vec<Map<String, JsonValue>> {
    match value {
        JsonValue::Array(items) => items.into_iter().map(object).collect(),
        other => vec![object(other)],
    }
}

fn registry() -> Arc<FactoryRegistry> {
    let mut registry = FactoryRegistry::new();
    registry
        .register(
            "order",
            &Schema::new()
                .field(FieldSpec::number("id").root_only())
                .field(FieldSpec::number("customerId").immutable())
                .field(FieldSpec::number("total")),
            &[],
        )
        .unwrap();
    registry
        .register(
            "orderLine",
            &Schema::new()
                .table("order_line")
                .field(FieldSpec::number("id").root_only())
                .field(
                    FieldSpec::number("orderId")
                        .column("order_id")
                        .references("order.id"),
                )
                .field(FieldSpec::string("sku")),
            &[],
        )
        .unwrap();
    registry
        .register(
            "task",
            &Schema::new()
                .field(FieldSpec::number("id").root_only())
                .field(FieldSpec::string("status"))
                .field(FieldSpec::date("deletedAt").column("deleted_at"))
                .field(FieldSpec::string("secret").immutable()),
            &["secret"],
        )
        .unwrap();
    Arc::new(registry)
}

fn pool() -> MemoryPool {
    MemoryPool::new([
        TableDef::new("order")
            .serial("id")
            .required("customerId")
            .required("total"),
        TableDef::new("order_line")
            .serial("id")
            .column("order_id")
            .required("sku"),
        TableDef::new("task")
            .serial("id")
            .required("status")
            .column("deleted_at")
            .column("secret"),
    ])
}

fn engine() -> StorageEngine<MemoryPool> {
    StorageEngine::new(registry(), pool())
}

async fn seed_tasks(engine: &StorageEngine<MemoryPool>) {
    engine
        .process(&[Instruction::create(
            "task",
            objects(json!([
                {"status": "active"},
                {"status": "pending"},
                {"status": "done", "deletedAt": "2024-03-01T12:00:00Z"},
                {"status": "active", "deletedAt": "2024-03-02T12:00:00Z"},
            ])),
        )])
        .await
        .unwrap();
}

fn created(outcome: &StepOutcome) -> &[servosaur_storage::Entity] {
    match outcome {
        StepOutcome::Created(entities) => entities,
        other => panic!("expected created entities, got {other:?}"),
    }
}

#[tokio::test]
async fn order_line_takes_the_id_of_the_order_created_before_it() {
    let engine = engine();
    let result = engine
        .process(&[
            Instruction::create("order", objects(json!({"customerId": 7, "total": 500}))),
            Instruction::create("orderLine", objects(json!({"sku": "X1"}))),
        ])
        .await
        .unwrap();

    let order = &created(&result.steps[0])[0];
    let line = &created(&result.steps[1])[0];
    assert_eq!(line.get("orderId"), order.get("id"));
    assert_eq!(line.get("sku"), Some(&json!("X1")));

    let stored = engine.pool().unwrap().rows("order_line").await.unwrap();
    assert_eq!(stored[0]["order_id"], *order.get("id").unwrap());
}

#[tokio::test]
async fn foreign_keys_resolve_to_the_most_recent_create() {
    let engine = engine();
    let result = engine
        .process(&[
            Instruction::create("order", objects(json!({"customerId": 1, "total": 10}))),
            Instruction::create("order", objects(json!({"customerId": 2, "total": 20}))),
            Instruction::create("orderLine", objects(json!({"sku": "A"}))),
        ])
        .await
        .unwrap();

    let second = &created(&result.steps[1])[0];
    let line = &created(&result.steps[2])[0];
    assert_eq!(line.get("orderId"), second.get("id"));
    assert_eq!(line.get("orderId"), Some(&json!(2)));

    let types: Vec<&str> = result.ledger.iter().map(|r| r.type_name.as_str()).collect();
    assert_eq!(types, ["orderLine", "order", "order"]);
    assert_eq!(result.records_for("order").count(), 2);
    assert_eq!(result.by_type()["orderLine"].len(), 1);
}

#[tokio::test]
async fn later_rows_of_one_create_are_more_recent() {
    let engine = engine();
    let result = engine
        .process(&[
            Instruction::create(
                "order",
                objects(json!([
                    {"customerId": 1, "total": 10},
                    {"customerId": 2, "total": 20},
                ])),
            ),
            Instruction::create("orderLine", objects(json!({"sku": "A"}))),
        ])
        .await
        .unwrap();

    let orders = created(&result.steps[0]);
    let line = &created(&result.steps[1])[0];
    assert_eq!(line.get("orderId"), orders[1].get("id"));
    assert_ne!(line.get("orderId"), orders[0].get("id"));

    let customers: Vec<_> = result
        .records_for("order")
        .map(|r| r.entity.get("customerId").cloned())
        .collect();
    assert_eq!(customers, [Some(json!(2)), Some(json!(1))]);
}

#[tokio::test]
async fn explicit_foreign_key_values_win_over_the_ledger() {
    let engine = engine();
    let result = engine
        .process(&[
            Instruction::create("order", objects(json!({"customerId": 1, "total": 10}))),
            Instruction::create("orderLine", objects(json!({"sku": "A", "orderId": 99}))),
        ])
        .await
        .unwrap();

    assert_eq!(created(&result.steps[1])[0].get("orderId"), Some(&json!(99)));
}

#[tokio::test]
async fn unresolved_foreign_keys_are_null() {
    let engine = engine();
    let result = engine
        .process(&[Instruction::create("orderLine", objects(json!({"sku": "A"})))])
        .await
        .unwrap();

    assert_eq!(created(&result.steps[0])[0].get("orderId"), Some(&JsonValue::Null));
}

#[tokio::test]
async fn failed_step_rolls_back_the_whole_batch() {
    let engine = engine();
    let err = engine
        .process(&[
            Instruction::create("order", objects(json!({"customerId": 7, "total": 500}))),
            // sku is required
            Instruction::create("orderLine", objects(json!({}))),
        ])
        .await
        .unwrap_err();

    match err {
        StorageError::FailedQuery {
            step, instruction, ..
        } => {
            assert_eq!(step, 1);
            assert_eq!(instruction, "create orderLine");
        }
        other => panic!("expected FailedQuery, got {other:?}"),
    }

    let pool = engine.pool().unwrap();
    assert!(pool.rows("order").await.unwrap().is_empty());
    assert!(pool.rows("order_line").await.unwrap().is_empty());
}

#[tokio::test]
async fn filters_select_by_membership_and_null_state() {
    let engine = engine();
    seed_tasks(&engine).await;

    let many = |filter: Filter| Instruction::many("task", filter);
    let result = engine
        .process(&[
            many(Filter::new()),
            many(Filter::new().r#in("status", ["active", "pending"])),
            many(Filter::new().not_null("deletedAt")),
            many(Filter::from(object(json!({"deletedAt": null})))),
            many(Filter::from(object(json!({"deletedAt": NOT_NULL, "status": "active"})))),
        ])
        .await
        .unwrap();

    let counts: Vec<usize> = result
        .steps
        .iter()
        .map(|step| match step {
            StepOutcome::Many(entities) => entities.len(),
            other => panic!("expected many, got {other:?}"),
        })
        .collect();
    assert_eq!(counts, [4, 3, 2, 2, 1]);
}

#[tokio::test]
async fn or_conjunction_joins_filter_keys() {
    let engine = engine().with_config(EngineConfig {
        conjunction: Conjunction::Or,
        ..EngineConfig::default()
    });
    seed_tasks(&engine).await;

    let result = engine
        .process(&[Instruction::many(
            "task",
            Filter::new().eq("status", "pending").not_null("deletedAt"),
        )])
        .await
        .unwrap();
    assert!(matches!(&result.steps[0], StepOutcome::Many(e) if e.len() == 3));
}

#[tokio::test]
async fn fetch_one_checks_cardinality() {
    let engine = engine();
    seed_tasks(&engine).await;

    let result = engine
        .process(&[Instruction::one("task", Filter::new().eq("status", "pending"))])
        .await
        .unwrap();
    match &result.steps[0] {
        StepOutcome::One(task) => assert_eq!(task.get("status"), Some(&json!("pending"))),
        other => panic!("expected one, got {other:?}"),
    }

    let err = engine
        .process(&[Instruction::one("task", Filter::new().eq("status", "archived"))])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { ref type_name } if type_name == "task"));

    let err = engine
        .process(&[Instruction::one("task", Filter::new().eq("status", "active"))])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Integrity { matched: 2, .. }));
}

#[tokio::test]
async fn filter_values_given_as_text_match_typed_columns() {
    let engine = engine();
    seed_tasks(&engine).await;
    engine
        .process(&[Instruction::create("order", objects(json!({"customerId": "7", "total": 500})))])
        .await
        .unwrap();

    let result = engine
        .process(&[
            Instruction::one("order", Filter::from(object(json!({"id": "1"})))),
            Instruction::many("order", Filter::new().r#in("customerId", ["7", "8"])),
            Instruction::many("task", Filter::new().eq("deletedAt", "2024-03-01 12:00:00")),
            Instruction::create("task", objects(json!({"status": "new", "deletedAt": "2024-03-05"}))),
        ])
        .await
        .unwrap();

    match &result.steps[0] {
        StepOutcome::One(order) => {
            assert_eq!(order.get("id"), Some(&json!(1)));
            assert_eq!(order.get("customerId"), Some(&json!(7)));
        }
        other => panic!("expected one, got {other:?}"),
    }
    assert!(matches!(&result.steps[1], StepOutcome::Many(e) if e.len() == 1));
    match &result.steps[2] {
        StepOutcome::Many(tasks) => {
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].get("status"), Some(&json!("done")));
        }
        other => panic!("expected many, got {other:?}"),
    }
    assert_eq!(
        created(&result.steps[3])[0].get("deletedAt"),
        Some(&json!("2024-03-05T00:00:00.000000Z"))
    );
}

#[tokio::test]
async fn fields_outside_a_variant_are_never_written() {
    let engine = engine();
    let result = engine
        .process(&[Instruction::create(
            "order",
            objects(json!({"id": 500, "customerId": 7, "total": 1, "coupon": "FREE"})),
        )])
        .await
        .unwrap();
    let order = &created(&result.steps[0])[0];
    assert_eq!(order.get("id"), Some(&json!(1)));
    assert!(order.get("coupon").is_none());

    // customerId is create-only
    let result = engine
        .process(&[Instruction::update(
            "order",
            object(json!({"customerId": 8, "total": 2})),
            Filter::new().eq("id", 1),
        )])
        .await
        .unwrap();
    match &result.steps[0] {
        StepOutcome::Updated(orders) => {
            assert_eq!(orders[0].get("customerId"), Some(&json!(7)));
            assert_eq!(orders[0].get("total"), Some(&json!(2)));
        }
        other => panic!("expected updated, got {other:?}"),
    }
    assert_eq!(result.ledger[0].action, LedgerAction::Update);

    let err = engine
        .process(&[Instruction::update(
            "order",
            object(json!({"customerId": 9})),
            Filter::new().eq("id", 1),
        )])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::EmptyUpdate { .. }));
}

#[tokio::test]
async fn updated_rows_do_not_satisfy_foreign_keys() {
    let engine = engine();
    engine
        .process(&[Instruction::create("order", objects(json!({"customerId": 1, "total": 1})))])
        .await
        .unwrap();

    let result = engine
        .process(&[
            Instruction::update("order", object(json!({"total": 3})), Filter::new()),
            Instruction::create("orderLine", objects(json!({"sku": "B"}))),
        ])
        .await
        .unwrap();
    assert_eq!(created(&result.steps[1])[0].get("orderId"), Some(&JsonValue::Null));
}

#[tokio::test]
async fn delete_reports_the_rows_removed() {
    let engine = engine();
    seed_tasks(&engine).await;

    let result = engine
        .process(&[
            Instruction::delete("task", Filter::new().eq("status", "active")),
            Instruction::many("task", Filter::new()),
        ])
        .await
        .unwrap();
    assert!(matches!(result.steps[0], StepOutcome::Deleted(2)));
    assert!(matches!(&result.steps[1], StepOutcome::Many(e) if e.len() == 2));
    assert!(result.ledger.is_empty());
}

#[tokio::test]
async fn step_outcomes_count_the_rows_they_touched() {
    let engine = engine();
    seed_tasks(&engine).await;

    let result = engine
        .process(&[
            Instruction::many("task", Filter::new()),
            Instruction::one("task", Filter::new().eq("status", "pending")),
            Instruction::update(
                "task",
                object(json!({"status": "archived"})),
                Filter::new().eq("status", "active"),
            ),
            Instruction::delete("task", Filter::new().eq("status", "archived")),
        ])
        .await
        .unwrap();

    let rows: Vec<u64> = result.steps.iter().map(StepOutcome::rows).collect();
    assert_eq!(rows, [4, 1, 2, 2]);
    assert_eq!(StepOutcome::Skipped.rows(), 0);
}

#[tokio::test]
async fn unknown_filter_keys_follow_the_engine_policy() {
    let engine = engine();
    seed_tasks(&engine).await;
    let filter = Filter::new().eq("status", "pending").eq("colour", "red");

    let err = engine
        .process(&[Instruction::many("task", filter.clone())])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::PropDescriptionNotFound { ref field, .. } if field == "colour"
    ));

    let lenient = StorageEngine::new(registry(), engine.pool().unwrap().clone()).with_config(
        EngineConfig {
            filter_keys: KeyPolicy::Drop,
            ..EngineConfig::default()
        },
    );
    let result = lenient.process(&[Instruction::many("task", filter)]).await.unwrap();
    assert!(matches!(&result.steps[0], StepOutcome::Many(e) if e.len() == 1));
}

#[tokio::test]
async fn hidden_fields_stay_out_of_the_representation() {
    let engine = engine();
    let result = engine
        .process(&[Instruction::create(
            "task",
            objects(json!({"status": "active", "secret": "s3cr3t"})),
        )])
        .await
        .unwrap();

    let task = &created(&result.steps[0])[0];
    assert_eq!(task.get("secret"), Some(&json!("s3cr3t")));
    let shown = serde_json::to_value(task).unwrap();
    assert!(shown.get("secret").is_none());
    assert_eq!(shown["status"], json!("active"));
}

#[tokio::test]
async fn unknown_actions_are_skipped() {
    let engine = engine();
    let instructions: Vec<Instruction> = serde_json::from_value(json!([
        {"instruction": "archive order"},
        {"instruction": "create order", "payload": {"customerId": 1, "total": 2}},
    ]))
    .unwrap();

    let result = engine.process(&instructions).await.unwrap();
    assert!(matches!(result.steps[0], StepOutcome::Skipped));
    assert_eq!(created(&result.steps[1]).len(), 1);
}

#[tokio::test]
async fn unregistered_types_fail_the_batch() {
    let engine = engine();
    let err = engine
        .process(&[
            Instruction::create("order", objects(json!({"customerId": 1, "total": 2}))),
            Instruction::many("invoice", Filter::new()),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::FactoryNotFound(ref name) if name == "invoice"));
    assert!(engine.pool().unwrap().rows("order").await.unwrap().is_empty());
}

#[tokio::test]
async fn detached_engines_have_no_connection() {
    let engine = StorageEngine::<MemoryPool>::detached(registry());
    let err = engine
        .process(&[Instruction::many("order", Filter::new())])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NoConnection));
    assert!(matches!(
        engine.exists("order", None).await,
        Err(StorageError::NoConnection)
    ));
}

#[tokio::test]
async fn empty_batches_and_payloads_commit_nothing() {
    let engine = engine();
    let result = engine.process(&[]).await.unwrap();
    assert!(result.ledger.is_empty());
    assert!(result.steps.is_empty());

    let result = engine
        .process(&[Instruction::create("order", Vec::new())])
        .await
        .unwrap();
    assert!(created(&result.steps[0]).is_empty());
}

#[tokio::test]
async fn update_requires_a_single_payload_object() {
    let engine = engine();
    let instruction = Instruction::new(servosaur_storage::Action::Update, "order")
        .with_payload(Payload::Many(objects(json!([{"total": 1}, {"total": 2}]))));

    let err = engine.process(&[instruction]).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidInstruction(_)));
}

#[tokio::test]
async fn exists_and_reserve_id_run_outside_batches() {
    let engine = engine();
    assert!(!engine.exists("order", None).await.unwrap());

    engine
        .process(&[Instruction::create("order", objects(json!({"customerId": 4, "total": 9})))])
        .await
        .unwrap();

    assert!(engine.exists("order", None).await.unwrap());
    assert!(
        engine
            .exists("order", Some(&Filter::new().eq("customerId", 4)))
            .await
            .unwrap()
    );
    assert!(
        !engine
            .exists("order", Some(&Filter::new().eq("customerId", 5)))
            .await
            .unwrap()
    );

    assert_eq!(engine.reserve_id("order", "id").await.unwrap(), 2);
    let result = engine
        .process(&[Instruction::create("order", objects(json!({"customerId": 4, "total": 1})))])
        .await
        .unwrap();
    assert_eq!(created(&result.steps[0])[0].get("id"), Some(&json!(3)));
}

#[tokio::test]
async fn batches_from_the_wire_run_end_to_end() {
    let engine = engine();
    let instructions: Vec<Instruction> = serde_json::from_value(json!([
        {"instruction": "create order", "payload": {"customerId": 3, "total": 40}},
        {"instruction": "create orderLine", "payload": [{"sku": "P1"}, {"sku": "P2"}]},
        {"instruction": "many orderLine", "filter": {"sku": ["P1", "P2"]}},
    ]))
    .unwrap();

    let result = engine.process(&instructions).await.unwrap();
    match &result.steps[2] {
        StepOutcome::Many(lines) => {
            assert_eq!(lines.len(), 2);
            assert!(lines.iter().all(|l| l.get("orderId") == Some(&json!(1))));
        }
        other => panic!("expected many, got {other:?}"),
    }

    let encoded = serde_json::to_value(&result.steps[0]).unwrap();
    assert_eq!(encoded["action"], json!("created"));
    assert_eq!(encoded["result"][0]["total"], json!(40));
}

#[tokio::test]
async fn concurrent_batches_are_isolated() {
    let engine = Arc::new(engine());

    let handles: Vec<_> = (0..8)
        .map(|customer| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .process(&[
                        Instruction::create(
                            "order",
                            objects(json!({"customerId": customer, "total": 1})),
                        ),
                        Instruction::create("orderLine", objects(json!({"sku": "C"}))),
                    ])
                    .await
            })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        let order = &created(&result.steps[0])[0];
        let line = &created(&result.steps[1])[0];
        assert_eq!(line.get("orderId"), order.get("id"));
    }

    let pool = engine.pool().unwrap();
    assert_eq!(pool.rows("order").await.unwrap().len(), 8);
    assert_eq!(pool.rows("order_line").await.unwrap().len(), 8);
}
