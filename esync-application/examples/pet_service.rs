//! 进程内端到端示例：网关提交命令 → 引擎落库并发布 → 订阅者消费事件
//!
//! 运行：`RUST_LOG=info cargo run -p esync-application --example pet_service`
//!
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use esync_application::{AppError, CommandGateway, Settings, telemetry};
use esync_domain::engine::SyncEngine;
use esync_domain::eventing::{
    EventDispatcher, EventHandler, HandledAggregateType, InMemoryEventBus,
};
use esync_domain::model::{Command, Event, Operation};
use esync_domain::persist::InMemoryAggregateStore;
use esync_domain::registry::{AggregateDefinition, AggregateRegistry, AggregateTypeConfig};
use esync_domain::validation::{JsonKind, PayloadConstraint};
use serde_json::json;
use std::sync::Arc;

const SETTINGS: &str = r#"
[engine]
worker_concurrency = 2
reconcile_interval = "500ms"

[gateway]
reply_timeout = "3s"
"#;

struct PetFeed;

#[async_trait]
impl EventHandler for PetFeed {
    fn handler_name(&self) -> &str {
        "pet-feed"
    }

    fn handled_aggregate_type(&self) -> HandledAggregateType {
        HandledAggregateType::One("pet".to_string())
    }

    async fn handle(&self, event: &Event) -> AnyResult<()> {
        println!(
            "[feed] {} {}@{} {}",
            event.operation(),
            event.aggregate_id(),
            event.version().value(),
            event.payload()
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    telemetry::init();
    let settings = Settings::from_toml_str(SETTINGS)?;

    let mut registry = AggregateRegistry::new();
    registry.register(
        AggregateDefinition::new(AggregateTypeConfig::derive("pet", &settings.engine.topics))
            .constraint(PayloadConstraint::required("name"))
            .constraint(PayloadConstraint::of_kind("name", JsonKind::String))
            .constraint(PayloadConstraint::max_length("name", 32)),
    )?;
    let registry = Arc::new(registry);

    let bus = Arc::new(InMemoryEventBus::default());
    let engine = Arc::new(
        SyncEngine::builder()
            .registry(registry.clone())
            .store(Arc::new(InMemoryAggregateStore::new()))
            .event_bus(bus.clone())
            .config(settings.engine.clone())
            .build(),
    );
    let engine_handle = engine.start().await?;

    let dispatcher = Arc::new(
        EventDispatcher::builder()
            .event_bus(bus.clone())
            .registry(registry.clone())
            .event_handlers(vec![Arc::new(PetFeed) as Arc<dyn EventHandler>])
            .build(),
    );
    let dispatcher_handle = dispatcher.start().await?;

    let gateway = CommandGateway::connect(
        bus.clone(),
        registry,
        &settings.engine.topics,
        settings.gateway.clone(),
    )
    .await?;

    let commands = [
        (Operation::Create, "req-1", json!({"name": "Rex"})),
        (Operation::Update, "req-2", json!({"age": 3})),
        (Operation::Create, "req-1", json!({"name": "Rex"})),
        (Operation::Update, "req-3", json!({"name": 42})),
        (Operation::Delete, "req-4", json!(null)),
    ];
    for (operation, request_id, payload) in commands {
        let command = Command::builder()
            .operation(operation)
            .aggregate_type("pet")
            .aggregate_id("rex")
            .request_id(request_id)
            .payload(payload)
            .build();
        match gateway.execute(&command).await {
            Ok(ack) if ack.is_duplicate() => {
                println!("{request_id}: duplicate, version {:?}", ack.version)
            }
            Ok(ack) => println!("{request_id}: accepted, version {:?}", ack.version),
            Err(AppError::Rejected { reason, .. }) => {
                println!("{request_id}: rejected ({reason})")
            }
            Err(err) => return Err(err.into()),
        }
    }

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    gateway.close().await;
    engine_handle.shutdown();
    engine_handle.join().await;
    dispatcher_handle.shutdown();
    dispatcher_handle.join().await;
    Ok(())
}
