use anyhow::Result as AnyResult;
use esync_application::{AppError, CommandGateway, GatewayConfig};
use esync_domain::config::EngineConfig;
use esync_domain::engine::{EngineHandle, SyncEngine};
use esync_domain::eventing::InMemoryEventBus;
use esync_domain::model::{Command, Operation};
use esync_domain::persist::InMemoryAggregateStore;
use esync_domain::registry::{
    AggregateDefinition, AggregateRegistry, AggregateTypeConfig, TopicNaming,
};
use esync_domain::validation::PayloadConstraint;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn registry() -> Arc<AggregateRegistry> {
    let mut registry = AggregateRegistry::new();
    registry
        .register(
            AggregateDefinition::new(AggregateTypeConfig::derive("pet", &TopicNaming::default()))
                .constraint(PayloadConstraint::required("name")),
        )
        .unwrap();
    Arc::new(registry)
}

fn command(op: Operation, id: &str, request: &str, payload: Value) -> Command {
    Command::builder()
        .operation(op)
        .aggregate_type("pet")
        .aggregate_id(id)
        .request_id(request)
        .payload(payload)
        .build()
}

async fn running_engine(bus: &InMemoryEventBus, registry: Arc<AggregateRegistry>) -> EngineHandle {
    let engine = SyncEngine::builder()
        .registry(registry)
        .store(Arc::new(InMemoryAggregateStore::new()))
        .event_bus(Arc::new(bus.clone()))
        .config(EngineConfig {
            worker_concurrency: 2,
            ..EngineConfig::default()
        })
        .build();
    Arc::new(engine).start().await.unwrap()
}

async fn gateway(bus: &InMemoryEventBus, registry: Arc<AggregateRegistry>) -> CommandGateway {
    CommandGateway::connect(
        Arc::new(bus.clone()),
        registry,
        &TopicNaming::default(),
        GatewayConfig {
            reply_timeout: Duration::from_secs(2),
        },
    )
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submitted_command_is_acknowledged_with_its_version() -> AnyResult<()> {
    let bus = InMemoryEventBus::default();
    let registry = registry();
    let engine = running_engine(&bus, registry.clone()).await;
    let gateway = gateway(&bus, registry).await;

    let create = command(Operation::Create, "p1", "r1", json!({"name": "Rex"}));
    let ack = gateway.execute(&create).await?;
    assert!(ack.accepted);
    assert_eq!(ack.request_id.as_str(), "r1");
    assert_eq!(ack.version.map(|v| v.value()), Some(1));

    let update = command(Operation::Update, "p1", "r2", json!({"age": 4}));
    let ack = gateway.execute(&update).await?;
    assert_eq!(ack.version.map(|v| v.value()), Some(2));

    // 客户端重试同一请求：幂等接受，版本不变
    let again = gateway.execute(&create).await?;
    assert!(again.is_duplicate());
    assert_eq!(again.version.map(|v| v.value()), Some(1));

    assert_eq!(gateway.pending(), 0);
    gateway.close().await;
    engine.shutdown();
    engine.join().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejection_is_returned_as_an_error_by_execute() -> AnyResult<()> {
    let bus = InMemoryEventBus::default();
    let registry = registry();
    let _engine = running_engine(&bus, registry.clone()).await;
    let gateway = gateway(&bus, registry).await;

    let nameless = command(Operation::Create, "p1", "r1", json!({}));
    let ack = gateway.submit(&nameless).await?;
    assert!(!ack.accepted);
    assert_eq!(ack.reason.as_deref(), Some("name: is required"));

    let missing = command(Operation::Update, "p9", "r2", json!({"name": "Ghost"}));
    match gateway.execute(&missing).await {
        Err(AppError::Rejected { request_id, reason }) => {
            assert_eq!(request_id.as_str(), "r2");
            assert_eq!(reason, "aggregate does not exist");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn missing_engine_times_out_and_forgets_the_waiter() {
    let bus = InMemoryEventBus::default();
    let gateway = CommandGateway::connect(
        Arc::new(bus.clone()),
        registry(),
        &TopicNaming::default(),
        GatewayConfig {
            reply_timeout: Duration::from_millis(50),
        },
    )
    .await
    .unwrap();

    let create = command(Operation::Create, "p1", "r1", json!({"name": "Rex"}));
    let err = gateway.submit(&create).await.unwrap_err();

    assert!(matches!(err, AppError::ReplyTimeout { .. }));
    assert_eq!(gateway.pending(), 0);
    // 命令本身已发布到命令主题
    let topic = AggregateTypeConfig::derive("pet", &TopicNaming::default());
    assert_eq!(bus.published(topic.command_topic()).len(), 1);
}

#[tokio::test]
async fn unregistered_aggregate_type_fails_before_publishing() {
    let bus = InMemoryEventBus::default();
    let gateway = gateway(&bus, registry()).await;

    let stray = Command::builder()
        .operation(Operation::Create)
        .aggregate_type("cat")
        .aggregate_id("c1")
        .request_id("r1")
        .build();
    let err = gateway.submit(&stray).await.unwrap_err();

    assert!(matches!(err, AppError::Domain(_)));
    assert_eq!(gateway.pending(), 0);
}
