use esync_domain::config::EngineConfig;
use esync_domain::engine::{ProcessingState, RecordingEmitter, RetryPolicy, SyncEngine};
use esync_domain::eventing::{BusMessage, EventBus, InMemoryEventBus};
use esync_domain::model::{AggregateId, Command, Event, Operation, RawCommand};
use esync_domain::persist::InMemoryAggregateStore;
use esync_domain::registry::{
    AggregateDefinition, AggregateRegistry, AggregateTypeConfig, TopicNaming,
};
use futures_util::future::join_all;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn config_for(name: &str) -> AggregateTypeConfig {
    AggregateTypeConfig::derive(name, &TopicNaming::default())
}

fn registry() -> Arc<AggregateRegistry> {
    let mut registry = AggregateRegistry::new();
    registry
        .register(AggregateDefinition::new(config_for("pet")))
        .unwrap();
    registry
        .register(AggregateDefinition::new(config_for("owner")))
        .unwrap();
    Arc::new(registry)
}

struct Harness {
    engine: Arc<SyncEngine>,
    store: Arc<InMemoryAggregateStore>,
    bus: InMemoryEventBus,
    emitter: Arc<RecordingEmitter>,
}

fn harness(config: EngineConfig) -> Harness {
    let store = Arc::new(InMemoryAggregateStore::new());
    let bus = InMemoryEventBus::default();
    let emitter = Arc::new(RecordingEmitter::new());
    let engine = SyncEngine::builder()
        .registry(registry())
        .store(store.clone())
        .event_bus(Arc::new(bus.clone()))
        .emitter(emitter.clone())
        .config(config)
        .build();
    Harness {
        engine: Arc::new(engine),
        store,
        bus,
        emitter,
    }
}

fn quick_config() -> EngineConfig {
    EngineConfig {
        worker_concurrency: 4,
        reconcile_interval: Duration::from_millis(20),
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
        },
        ..EngineConfig::default()
    }
}

fn raw(op: &str, ty: &str, id: &str, request: &str, payload: Value) -> RawCommand {
    RawCommand {
        operation: Some(op.to_string()),
        aggregate_type: Some(ty.to_string()),
        aggregate_id: Some(id.to_string()),
        request_id: Some(request.to_string()),
        payload: Some(payload),
        mistyped: Vec::new(),
    }
}

fn versions_on_topic(bus: &InMemoryEventBus, ty: &str, id: &str) -> Vec<u64> {
    bus.published(config_for(ty).event_topic())
        .iter()
        .map(|m| Event::from_message(m).unwrap())
        .filter(|e| e.aggregate_id().as_str() == id)
        .map(|e| e.version().value())
        .collect()
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commands_on_one_aggregate_are_serialized() {
    let h = harness(quick_config());
    h.engine
        .process(raw("create", "pet", "p1", "r0", json!({"n": 0})))
        .await;

    let updates = (1..=20).map(|i| {
        let engine = h.engine.clone();
        async move {
            engine
                .process(raw("update", "pet", "p1", &format!("r{i}"), json!({"n": i})))
                .await
        }
    });
    let outcomes = join_all(updates).await;

    // 聚合锁串行化：无冲突、无重试
    assert!(outcomes.iter().all(|o| o.state == ProcessingState::Acknowledged));
    assert!(outcomes.iter().all(|o| o.attempts == 1));

    let mut versions: Vec<u64> = outcomes
        .iter()
        .map(|o| o.version.unwrap().value())
        .collect();
    versions.sort();
    assert_eq!(versions, (2..=21).collect::<Vec<_>>());

    assert_eq!(
        versions_on_topic(&h.bus, "pet", "p1"),
        (1..=21).collect::<Vec<_>>()
    );
    let snapshot = h
        .store
        .snapshot(&config_for("pet"), &AggregateId::from("p1"))
        .unwrap();
    assert_eq!(snapshot.version.value(), 21);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_aggregates_proceed_independently() {
    let h = harness(quick_config());
    h.store.set_commit_delay(Some(Duration::from_millis(50)));

    let creates = (0..8).map(|i| {
        let engine = h.engine.clone();
        async move {
            engine
                .process(raw("create", "pet", &format!("p{i}"), &format!("r{i}"), json!({})))
                .await
        }
    });
    let started = tokio::time::Instant::now();
    let outcomes = join_all(creates).await;

    assert!(outcomes.iter().all(|o| o.state == ProcessingState::Acknowledged));
    assert!(outcomes.iter().all(|o| o.version.unwrap().value() == 1));
    // 串行执行至少需要 8 × 50ms
    assert!(started.elapsed() < Duration::from_millis(350));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn running_engine_consumes_command_topics() {
    let h = harness(quick_config());
    let handle = h.engine.clone().start().await.unwrap();

    for (ty, id) in [("pet", "p1"), ("owner", "o1")] {
        let create = Command::builder()
            .operation(Operation::Create)
            .aggregate_type(ty)
            .aggregate_id(id)
            .request_id(format!("{id}-create"))
            .payload(json!({"name": id}))
            .build();
        h.bus
            .publish(config_for(ty).command_topic(), &create.to_message().unwrap())
            .await
            .unwrap();
    }
    eventually("both creates", || h.emitter.emitted().len() == 2).await;

    for i in 0..10 {
        let update = Command::builder()
            .operation(Operation::Update)
            .aggregate_type("pet")
            .aggregate_id("p1")
            .request_id(format!("p1-update-{i}"))
            .payload(json!({"seq": i}))
            .build();
        h.bus
            .publish(config_for("pet").command_topic(), &update.to_message().unwrap())
            .await
            .unwrap();
    }
    eventually("all updates", || h.emitter.emitted().len() == 12).await;

    assert!(h.emitter.emitted().iter().all(|a| a.accepted));
    assert_eq!(
        versions_on_topic(&h.bus, "pet", "p1"),
        (1..=11).collect::<Vec<_>>()
    );
    assert_eq!(versions_on_topic(&h.bus, "owner", "o1"), vec![1]);
    eventually("command deliveries acked", || {
        h.bus.acked(config_for("pet").command_topic()) == 11
    })
    .await;

    handle.shutdown();
    handle.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn undecodable_command_is_dropped_and_acked() {
    let h = harness(quick_config());
    let handle = h.engine.clone().start().await.unwrap();
    let pet = config_for("pet");
    let topic = pet.command_topic();

    let garbage = BusMessage::builder().payload(json!("not a command")).build();
    h.bus.publish(topic, &garbage).await.unwrap();

    eventually("garbage acked", || h.bus.acked(topic) == 1).await;
    assert!(h.emitter.emitted().is_empty());
    assert_eq!(h.store.event_count(&config_for("pet")), 0);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mistyped_command_field_is_rejected_with_a_reply() {
    let h = harness(quick_config());
    let handle = h.engine.clone().start().await.unwrap();
    let pet = config_for("pet");
    let topic = pet.command_topic();

    let mistyped = BusMessage::builder()
        .payload(json!({
            "operation": "create",
            "aggregateType": "pet",
            "aggregateId": 42,
            "requestId": "r1",
            "payload": {"name": "Rex"}
        }))
        .build();
    h.bus.publish(topic, &mistyped).await.unwrap();

    eventually("rejection emitted", || h.emitter.emitted().len() == 1).await;
    let acks = h.emitter.emitted();
    assert!(!acks[0].accepted);
    assert_eq!(acks[0].request_id.as_str(), "r1");
    assert_eq!(acks[0].reason.as_deref(), Some("aggregateId: must be a string"));
    eventually("command acked", || h.bus.acked(topic) == 1).await;
    assert_eq!(h.store.event_count(&pet), 0);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_reconciler_publishes_pending_events() {
    let h = harness(quick_config());
    let topic = config_for("pet").event_topic().to_string();
    h.bus.fail_next_publishes(&topic, 100);

    let outcome = h
        .engine
        .process(raw("create", "pet", "p1", "r1", json!({})))
        .await;
    assert_eq!(outcome.state, ProcessingState::BusFailed);
    h.bus.fail_next_publishes(&topic, 0);

    let handle = h.engine.clone().start().await.unwrap();
    eventually("reconciled publish", || h.bus.published(&topic).len() == 1).await;
    assert_eq!(h.store.unpublished_count(&config_for("pet")), 0);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn start_rejects_invalid_configuration() {
    let h = harness(EngineConfig {
        worker_concurrency: 0,
        ..EngineConfig::default()
    });
    assert!(h.engine.clone().start().await.is_err());
}
