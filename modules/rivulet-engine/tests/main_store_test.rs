//! Several stores on one bus through `MainStore`.

use std::sync::{Arc, Mutex};

use rivulet_core::{action, action_typed, extract, join, QueryValue, StoreDef};
use rivulet_engine::{EngineConfig, MainStore};
use serde_json::{json, Value};
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn keyed(pairs: Value) -> QueryValue {
    serde_json::from_value(pairs)
        .map(QueryValue::Keyed)
        .unwrap()
}

fn add_f64(a: &Value, b: &Value) -> Value {
    json!(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0))
}

fn add_i64(a: &Value, b: &Value) -> Value {
    json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0))
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn store_action_through_main() {
    let st = StoreDef::builder()
        .slot("inc", action_typed(|v: i64| v + 1))
        .slot("call2", extract(["CREATE_TODO"]))
        .build();
    let main = MainStore::new([("st", st.clone())]).unwrap();

    let value = main
        .action(st.get("inc").unwrap(), json!(123))
        .await
        .unwrap();
    assert_eq!(value.value(), Some(&json!(124)));
    assert_eq!(main.action_names(&st).unwrap(), vec!["inc".to_string()]);
    assert_eq!(main.executors()[0].name(), "st");
}

#[tokio::test]
async fn read_store_returns_every_slot() {
    let st = StoreDef::builder()
        .slot(
            "create",
            action(|id| json!({"id": id, "title": "todo"})).internal_as("TODO_CREATED"),
        )
        .slot("single_key", extract(["TODO_CREATED"]))
        .slot("by_key", extract(["TODO_CREATED"]).by_id())
        .build();
    let main = MainStore::new([("st", st.clone())]).unwrap();

    let created = main.call(&st, "create", json!("1")).await.unwrap();
    assert_eq!(created.value().unwrap()["id"], json!("1"));

    let values = main.read_store(&st).await.unwrap();
    assert_eq!(
        values["by_key"],
        keyed(json!({"1": {"id": "1", "title": "todo", "type": "TODO_CREATED"}}))
    );
    assert_eq!(values["single_key"].value().unwrap()["id"], json!("1"));
}

#[tokio::test]
async fn listen_store_through_main() {
    let st = StoreDef::builder()
        .slot(
            "create",
            action(|id| {
                let title = format!("todo{}", id.as_str().unwrap_or_default());
                json!({"id": id, "title": title})
            })
            .internal_as("TODO_CREATED"),
        )
        .slot("single_key", extract(["TODO_CREATED"]))
        .slot("by_key", extract(["TODO_CREATED"]).by_id().select("title"))
        .build();
    let main = MainStore::new([("st", st.clone())]).unwrap();
    let updates = Arc::new(Mutex::new(Vec::new()));

    let sink = updates.clone();
    let id = main
        .listen_store(&st, move |snapshot| sink.lock().unwrap().push(snapshot.clone()))
        .await
        .unwrap();
    main.call(&st, "create", json!("1")).await.unwrap();
    main.call(&st, "create", json!("2")).await.unwrap();

    {
        let updates = updates.lock().unwrap();
        assert!(updates.len() >= 3);
        let last = updates.last().unwrap();
        assert_eq!(last["by_key"], keyed(json!({"1": "todo1", "2": "todo2"})));
        assert_eq!(last["single_key"].value().unwrap()["title"], json!("todo2"));
    }

    assert!(main.unlisten_store(&st, id).unwrap());
    assert!(!main.unlisten_store(&st, id).unwrap());
}

#[tokio::test]
async fn unknown_stores_register_lazily() {
    init_tracing();
    let main = MainStore::with_config(
        Vec::<(String, Arc<StoreDef>)>::new(),
        EngineConfig::builder().executor_prefix("dyn").build(),
    )
    .unwrap();
    let dynamic = StoreDef::builder()
        .slot(
            "create",
            action(|id| {
                let title = format!("dynamic{}", id.as_str().unwrap_or_default());
                json!({"id": id, "title": title})
            })
            .internal_as("TODO_CREATED"),
        )
        .slot("todos", extract(["TODO_CREATED"]).by_id().select("title"))
        .build();

    assert_eq!(main.action_names(&dynamic).unwrap(), vec!["create".to_string()]);
    main.call(&dynamic, "create", json!("1")).await.unwrap();
    let values = main.read_store(&dynamic).await.unwrap();
    assert_eq!(values["todos"], keyed(json!({"1": "dynamic1"})));

    let updates = Arc::new(Mutex::new(0_usize));
    let sink = updates.clone();
    let id = main
        .listen_store(&dynamic, move |_| *sink.lock().unwrap() += 1)
        .await
        .unwrap();
    main.call(&dynamic, "create", json!("2")).await.unwrap();

    assert!(*updates.lock().unwrap() >= 2);
    assert!(main.unlisten_store(&dynamic, id).unwrap());
    let values = main.read_store(&dynamic).await.unwrap();
    assert_eq!(
        values["todos"],
        keyed(json!({"1": "dynamic1", "2": "dynamic2"}))
    );

    let executors = main.executors();
    assert_eq!(executors.len(), 1);
    assert_eq!(executors[0].name(), "dyn_0");
}

#[tokio::test]
async fn unbound_queries_have_no_executor() {
    let main = MainStore::new(Vec::<(String, Arc<StoreDef>)>::new()).unwrap();
    let err = main.read_query(&extract(["A"])).await.unwrap_err();
    assert!(matches!(err, rivulet_core::Error::NotInStore(_)));
}

// ---------------------------------------------------------------------------
// Cross-store communication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn external_events_reach_other_stores_only() {
    let pinger = StoreDef::builder()
        .slot("out", extract(["PING"]).external_as("PONG"))
        .slot("pongs", extract(["PONG"]).as_value(json!(1)).reduce(add_i64))
        .build();
    let listener = StoreDef::builder()
        .slot("pongs", extract(["PONG"]).as_value(json!(1)).reduce(add_i64))
        .build();
    let main = MainStore::new([("pinger", pinger.clone()), ("listener", listener.clone())]).unwrap();

    main.publish(json!({"type": "PING"})).await.unwrap();
    main.settled().await;

    let mine = main.read_query(pinger.get("pongs").unwrap()).await.unwrap();
    let theirs = main.read_query(listener.get("pongs").unwrap()).await.unwrap();
    assert_eq!(mine, QueryValue::Single(None));
    assert_eq!(theirs.value(), Some(&json!(1)));
}

#[tokio::test]
async fn frontend_backend_and_bridge() {
    init_tracing();
    let frontend = StoreDef::builder()
        .slot("published", extract(["CREATE_TODO"]).external())
        .slot("list", extract(["TODO_CREATED"]).by_id().latest())
        .build();
    let backend = StoreDef::builder()
        .slot(
            "published",
            extract(["CREATE_TODO_REQUEST"])
                .map(|v| json!({"id": v["text"]}))
                .external_as("TODO_CREATED_RESPONSE"),
        )
        .build();
    let bridge = StoreDef::builder()
        .slot(
            "from_backend",
            extract(["TODO_CREATED_RESPONSE"]).external_as("TODO_CREATED"),
        )
        .slot(
            "from_frontend",
            extract(["CREATE_TODO"]).external_as("CREATE_TODO_REQUEST"),
        )
        .build();
    let main = MainStore::new([
        ("frontend", frontend.clone()),
        ("backend", backend),
        ("bridge", bridge),
    ])
    .unwrap();

    for text in ["todo1", "todo2", "todo3"] {
        main.publish(json!({"type": "CREATE_TODO", "text": text}))
            .await
            .unwrap();
    }
    main.settled().await;

    let keys = main.read_keys(frontend.get("list").unwrap()).await.unwrap();
    assert_eq!(keys.len(), 3);
}

#[tokio::test]
async fn detached_publish_reaches_every_store() {
    let a = StoreDef::builder()
        .slot("seen", extract(["PING"]).as_value(json!(true)))
        .build();
    let b = StoreDef::builder()
        .slot("seen", extract(["PING"]).as_value(json!(true)))
        .build();
    let main = MainStore::new([("a", a.clone()), ("b", b.clone())]).unwrap();

    main.publish_detached(json!({"type": "PING"})).unwrap();
    main.settled().await;

    for store in [&a, &b] {
        let seen = main.read_query(store.get("seen").unwrap()).await.unwrap();
        assert_eq!(seen.value(), Some(&json!(true)));
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_todos_leave_the_active_view() {
    let todos = StoreDef::builder()
        .slot(
            "create",
            action(|title| {
                json!({"type": "TODO_CREATED", "id": Uuid::new_v4().to_string(), "title": title})
            })
            .internal(),
        )
        .slot(
            "complete",
            action(|id| json!({"type": "TODO_COMPLETED", "id": id})).internal(),
        )
        .slot("todos", extract(["TODO_CREATED"]).by_id())
        .slot(
            "active",
            join([
                ("created", extract(["TODO_CREATED"]).by_id()),
                ("completed", extract(["TODO_COMPLETED"]).by_id().optional()),
            ])
            .filter(|t| t["completed"].is_null())
            .map(|t| t["created"].clone()),
        )
        .build();
    let main = MainStore::new([("todos", todos.clone())]).unwrap();
    let active = todos.get("active").unwrap().clone();

    let first = main.call(&todos, "create", json!("Learn rivulet")).await.unwrap();
    let second = main.call(&todos, "create", json!("Build an app")).await.unwrap();
    assert_eq!(main.read_query(&active).await.unwrap().len(), 2);

    let first_id = first.value().unwrap()["id"].clone();
    main.call(&todos, "complete", first_id).await.unwrap();

    let remaining = main.read_query(&active).await.unwrap();
    assert_eq!(remaining.len(), 1);
    let second_id = second.value().unwrap()["id"].as_str().unwrap().to_string();
    assert!(remaining.get(&second_id).is_some());
}

#[tokio::test]
async fn order_flow_across_split_stores() {
    init_tracing();
    let charges: Arc<Mutex<Vec<(String, f64)>>> = Arc::default();
    let notifications: Arc<Mutex<Vec<String>>> = Arc::default();

    let orders = StoreDef::builder()
        .slot(
            "place_order",
            action(|customer| {
                json!({
                    "type": "ORDER_PLACED",
                    "orderId": "order-1",
                    "customerId": customer,
                })
            })
            .internal()
            .external(),
        )
        .slot(
            "add_item",
            action_typed(
                |(order_id, product_id, quantity, price): (String, String, i64, f64)| {
                    json!({
                        "type": "ITEM_ADDED",
                        "orderId": order_id,
                        "productId": product_id,
                        "quantity": quantity,
                        "price": price,
                    })
                },
            )
            .internal()
            .external(),
        )
        .slot("orders", extract(["ORDER_PLACED"]).by("orderId"))
        .slot(
            "order_totals",
            extract(["ITEM_ADDED"])
                .by("orderId")
                .map(|i| json!(i["price"].as_f64().unwrap_or(0.0) * i["quantity"].as_f64().unwrap_or(0.0)))
                .reduce(add_f64),
        )
        .build();

    let inventory = StoreDef::builder()
        .slot(
            "reserve",
            extract(["ITEM_ADDED"])
                .internal_with(|i| {
                    json!({
                        "type": "INVENTORY_RESERVED",
                        "orderId": i["orderId"],
                        "productId": i["productId"],
                        "quantity": i["quantity"],
                    })
                })
                .external(),
        )
        .slot(
            "reservations",
            extract(["INVENTORY_RESERVED"])
                .by("productId")
                .map(|r| r["quantity"].clone())
                .reduce(add_i64),
        )
        .build();

    let charged = charges.clone();
    let notified = notifications.clone();
    let payments = StoreDef::builder()
        .slot(
            "process_payment",
            join([
                ("orderId", extract(["ORDER_PLACED"]).by("orderId").select("orderId")),
                (
                    "total",
                    extract(["ITEM_ADDED"])
                        .by("orderId")
                        .map(|i| json!(i["price"].as_f64().unwrap_or(0.0) * i["quantity"].as_f64().unwrap_or(0.0)))
                        .reduce(add_f64),
                ),
                (
                    "itemCount",
                    extract(["ITEM_ADDED"]).by("orderId").as_value(json!(1)).reduce(add_i64),
                ),
                (
                    "reservedCount",
                    extract(["INVENTORY_RESERVED"])
                        .by("orderId")
                        .as_value(json!(1))
                        .reduce(add_i64),
                ),
            ])
            .filter(|o| o["itemCount"] == o["reservedCount"])
            .eval_map(move |order| {
                let charged = charged.clone();
                async move {
                    let order_id = order["orderId"].as_str().unwrap_or_default().to_string();
                    let amount = order["total"].as_f64().unwrap_or(0.0);
                    charged.lock().unwrap().push((order_id.clone(), amount));
                    Ok::<_, anyhow::Error>(json!({
                        "type": "PAYMENT_PROCESSED",
                        "orderId": order_id,
                        "amount": amount,
                        "transactionId": "tx-123",
                    }))
                }
            })
            .internal()
            .external(),
        )
        .slot(
            "confirmations",
            extract(["PAYMENT_PROCESSED"])
                .eval_tap(move |payment| {
                    let notified = notified.clone();
                    async move {
                        notified.lock().unwrap().push(format!(
                            "Order {} confirmed! Total: ${}",
                            payment["orderId"].as_str().unwrap_or_default(),
                            payment["amount"]
                        ));
                        Ok::<(), anyhow::Error>(())
                    }
                })
                .internal_with(|p| {
                    json!({
                        "type": "ORDER_CONFIRMED",
                        "orderId": p["orderId"],
                        "totalAmount": p["amount"],
                    })
                })
                .external(),
        )
        .build();

    let main = MainStore::new([
        ("orders", orders.clone()),
        ("inventory", inventory.clone()),
        ("payments", payments),
    ])
    .unwrap();

    let order = main
        .call(&orders, "place_order", json!("customer-123"))
        .await
        .unwrap();
    let order_id = order.value().unwrap()["orderId"].clone();
    main.settled().await;

    main.call(&orders, "add_item", json!([order_id, "product-1", 2, 50.0]))
        .await
        .unwrap();
    main.settled().await;
    main.call(&orders, "add_item", json!([order_id, "product-2", 1, 50.0]))
        .await
        .unwrap();
    main.settled().await;

    let placed = main.read_query(orders.get("orders").unwrap()).await.unwrap();
    assert!(placed.get("order-1").is_some());

    let totals = main
        .read_query(orders.get("order_totals").unwrap())
        .await
        .unwrap();
    assert_eq!(totals.get("order-1"), Some(&json!(150.0)));

    let reservations = main
        .read_query(inventory.get("reservations").unwrap())
        .await
        .unwrap();
    assert_eq!(reservations, keyed(json!({"product-1": 2, "product-2": 1})));

    assert!(charges
        .lock()
        .unwrap()
        .contains(&("order-1".to_string(), 150.0)));
    assert!(notifications
        .lock()
        .unwrap()
        .iter()
        .any(|n| n.starts_with("Order order-1 confirmed!")));
}
