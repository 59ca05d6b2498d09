//! Demo server wiring both plugins into one async-graphql service.
//!
//! - `Mutation.publish(topic, message)` dispatches an event through the pub/sub bridge
//! - `Subscription.messages(topic)` streams the events of a topic over `/graphql/ws`
//! - usage reporting is enabled when `APOLLO_KEY` and `APOLLO_GRAPH_REF` are set
//!
//! Environment: `BIND_ADDR` (default `0.0.0.0:4000`), `RUST_LOG`.

use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, InputValue, Object, Schema, Subscription, SubscriptionField,
    SubscriptionFieldFuture, TypeRef,
};
use async_graphql::Value;
use futures::StreamExt;
use graphql_plugin_kit::shutdown::{run_with_graceful_shutdown, ShutdownConfig, ShutdownCoordinator};
use graphql_plugin_kit::usage_reporting::API_KEY_ENV;
use graphql_plugin_kit::{
    EventTarget, MemoryBroker, PluginRegistry, PubSub, ServeMux, UsageReporting,
    UsageReportingConfig,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn build_schema(pubsub: PubSub, usage: Option<&UsageReporting>) -> anyhow::Result<Schema> {
    let query = Object::new("Query").field(Field::new(
        "hello",
        TypeRef::named_nn(TypeRef::STRING),
        |_| FieldFuture::new(async { Ok(Some(Value::from("world"))) }),
    ));

    let mutation = Object::new("Mutation").field(
        Field::new("publish", TypeRef::named_nn(TypeRef::BOOLEAN), |ctx| {
            FieldFuture::new(async move {
                let topic = ctx.args.try_get("topic")?.string()?;
                let message = ctx.args.try_get("message")?.string()?;
                ctx.data::<PubSub>()?.publish(topic, message).await?;
                Ok(Some(Value::from(true)))
            })
        })
        .argument(InputValue::new("topic", TypeRef::named_nn(TypeRef::STRING)))
        .argument(InputValue::new("message", TypeRef::named_nn(TypeRef::STRING))),
    );

    let subscription = Subscription::new("Subscription").field(
        SubscriptionField::new("messages", TypeRef::named(TypeRef::STRING), |ctx| {
            SubscriptionFieldFuture::new(async move {
                let topic = ctx.args.try_get("topic")?.string()?.to_string();
                let stream = ctx.data::<PubSub>()?.subscribe(&topic).await?;
                Ok(stream.map(|data| {
                    let value = match data {
                        Some(serde_json::Value::String(s)) => Value::from(s),
                        Some(other) => Value::from(other.to_string()),
                        None => Value::Null,
                    };
                    Ok::<_, async_graphql::Error>(FieldValue::value(value))
                }))
            })
        })
        .argument(InputValue::new("topic", TypeRef::named_nn(TypeRef::STRING))),
    );

    let mut builder = Schema::build("Query", Some("Mutation"), Some("Subscription"))
        .register(query)
        .register(mutation)
        .register(subscription)
        .data(pubsub);
    if let Some(usage) = usage {
        builder = builder.extension(usage.clone());
    }
    Ok(builder.finish()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:4000".to_string());

    // Two connections, as a networked provider requires separate publish and
    // subscribe connections
    let broker = MemoryBroker::new();
    let pubsub = PubSub::new(EventTarget::new(broker.connect(), broker.connect()));

    let usage = if std::env::var_os(API_KEY_ENV).is_some() {
        Some(UsageReporting::new(UsageReportingConfig::new())?)
    } else {
        info!("{API_KEY_ENV} not set; usage reporting disabled");
        None
    };

    let schema = build_schema(pubsub, usage.as_ref())?;
    let mut plugins = PluginRegistry::new();
    let mut coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
    if let Some(usage) = usage {
        plugins.register(usage.clone());
        coordinator = coordinator.with_usage_reporting(usage);
    }

    let mut mux = ServeMux::new(schema, plugins).await?;
    mux.enable_metrics();

    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "GraphQL endpoint: http://{addr}/graphql");

    run_with_graceful_shutdown(listener, mux.into_router(), coordinator).await?;
    Ok(())
}
