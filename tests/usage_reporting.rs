use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, Object, Schema, Subscription, SubscriptionField,
    SubscriptionFieldFuture, TypeRef,
};
use async_graphql::Value;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use graphql_plugin_kit::usage_reporting::proto::{trace, Report};
use graphql_plugin_kit::usage_reporting::{schema_id, ResolvedConfig};
use graphql_plugin_kit::{
    PluginRegistry, ReportTransport, ServeMux, UsageReporting, UsageReportingConfig,
};
use tokio::sync::mpsc;
use tower::ServiceExt;

struct ChannelTransport(mpsc::UnboundedSender<Report>);

#[async_trait::async_trait]
impl ReportTransport for ChannelTransport {
    async fn send(&self, report: Report) -> graphql_plugin_kit::Result<()> {
        let _ = self.0.send(report);
        Ok(())
    }
}

fn config() -> ResolvedConfig {
    UsageReportingConfig::new()
        .api_key("service:test:key")
        .graph_ref("test@current")
        .resolve_with(|_| None)
        .unwrap()
}

fn reporting() -> (UsageReporting, mpsc::UnboundedReceiver<Report>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UsageReporting::with_transport(config(), ChannelTransport(tx)), rx)
}

fn schema(usage: &UsageReporting) -> Schema {
    let user = Object::new("User").field(Field::new(
        "name",
        TypeRef::named_nn(TypeRef::STRING),
        |_| FieldFuture::new(async { Ok(Some(Value::from("ada"))) }),
    ));
    let query = Object::new("Query")
        .field(Field::new(
            "hello",
            TypeRef::named_nn(TypeRef::STRING),
            |_| FieldFuture::new(async { Ok(Some(Value::from("world"))) }),
        ))
        .field(Field::new(
            "users",
            TypeRef::named_nn_list_nn("User"),
            |_| {
                FieldFuture::new(async {
                    Ok(Some(FieldValue::list(vec![
                        FieldValue::owned_any(()),
                        FieldValue::owned_any(()),
                    ])))
                })
            },
        ))
        .field(Field::new(
            "broken",
            TypeRef::named(TypeRef::STRING),
            |_| FieldFuture::new(async { Err::<Option<Value>, _>("resolver failed".into()) }),
        ));
    let subscription = Subscription::new("Subscription").field(SubscriptionField::new(
        "ticks",
        TypeRef::named_nn(TypeRef::INT),
        |_| {
            SubscriptionFieldFuture::new(async {
                Ok(futures::stream::iter(0..2)
                    .map(|i| Ok::<_, async_graphql::Error>(FieldValue::value(Value::from(i)))))
            })
        },
    ));

    Schema::build("Query", None, Some("Subscription"))
        .register(user)
        .register(query)
        .register(subscription)
        .extension(usage.clone())
        .finish()
        .expect("schema builds")
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Report>) -> Vec<Report> {
    let mut reports = Vec::new();
    while let Ok(report) = rx.try_recv() {
        reports.push(report);
    }
    reports
}

#[tokio::test]
async fn test_batched_request_sends_one_report() {
    let (usage, mut rx) = reporting();
    let schema = schema(&usage);
    let expected_id = schema_id(&schema.sdl());
    let mux = ServeMux::new(schema, PluginRegistry::new().with(usage.clone()))
        .await
        .unwrap();
    assert_eq!(usage.schema_id().as_deref(), Some(expected_id.as_str()));

    let response = mux
        .into_router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/graphql")
                .header("content-type", "application/json")
                .header("apollographql-client-name", "ios")
                .header("apollographql-client-version", "2.1")
                .body(Body::from(
                    r#"[{"query":"query Greet { hello }"},{"query":"{ users { handle: name } }"}]"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    to_bytes(response.into_body(), 1024 * 1024).await.unwrap();

    usage.flush().await;
    let reports = drain(&mut rx);
    assert_eq!(reports.len(), 1);

    let report = &reports[0];
    assert_eq!(report.operation_count, 2);
    let header = report.header.as_ref().unwrap();
    assert_eq!(header.executable_schema_id, expected_id);
    assert_eq!(header.graph_ref, "test@current");

    let greet = &report.traces_per_query["# Greet\nquery Greet{hello}"].trace[0];
    assert_eq!(greet.client_name, "ios");
    assert_eq!(greet.client_version, "2.1");
    assert_eq!(greet.operation_type, "query");
    assert!(greet.start_time.is_some());
    let root = greet.root.as_ref().unwrap();
    assert_eq!(root.child.len(), 1);
    assert_eq!(
        root.child[0].id,
        Some(trace::node::Id::ResponseName("hello".into()))
    );
    assert_eq!(root.child[0].parent_type, "Query");

    let users = &report.traces_per_query["# -\n{users{handle:name}}"].trace[0];
    let users_node = &users.root.as_ref().unwrap().child[0];
    assert_eq!(users_node.child.len(), 2);
    assert_eq!(users_node.child[1].id, Some(trace::node::Id::Index(1)));
    let handle = &users_node.child[1].child[0];
    assert_eq!(handle.id, Some(trace::node::Id::ResponseName("handle".into())));
    assert_eq!(handle.original_field_name, "name");
}

#[tokio::test]
async fn test_field_errors_recorded_on_node() {
    let (usage, mut rx) = reporting();
    let schema = schema(&usage);
    usage.set_schema(&schema.sdl());

    // Without a request-scoped buffer the operation is reported on completion
    let response = schema.execute("{ hello broken }").await;
    assert_eq!(response.errors.len(), 1);

    usage.flush().await;
    let reports = drain(&mut rx);
    assert_eq!(reports.len(), 1);
    let trace = &reports[0].traces_per_query["# -\n{hello broken}"].trace[0];
    let broken = trace
        .root
        .as_ref()
        .unwrap()
        .child
        .iter()
        .find(|n| n.id == Some(trace::node::Id::ResponseName("broken".into())))
        .unwrap();
    assert_eq!(broken.error.len(), 1);
    assert_eq!(broken.error[0].message, "resolver failed");
}

#[tokio::test]
async fn test_parse_errors_recorded_on_root() {
    let (usage, mut rx) = reporting();
    let schema = schema(&usage);
    usage.set_schema(&schema.sdl());

    // Validation failure: the document parses, the field does not exist
    let response = schema.execute("{ missing }").await;
    assert!(!response.errors.is_empty());

    usage.flush().await;
    let reports = drain(&mut rx);
    assert_eq!(reports.len(), 1);
    let trace = &reports[0].traces_per_query["# -\n{missing}"].trace[0];
    assert!(!trace.root.as_ref().unwrap().error.is_empty());
}

#[tokio::test]
async fn test_unknown_schema_id_not_recorded() {
    let (usage, mut rx) = reporting();
    let schema = schema(&usage);

    let response = schema.execute("{ hello }").await;
    assert!(response.errors.is_empty());

    usage.flush().await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_streamed_results_not_reported() {
    let (usage, mut rx) = reporting();
    let schema = schema(&usage);
    usage.set_schema(&schema.sdl());

    let ticks: Vec<_> = schema.execute_stream("subscription { ticks }").collect().await;
    assert_eq!(ticks.len(), 2);

    usage.flush().await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_schema_id_follows_replacement() {
    let (usage, mut rx) = reporting();
    let mux = ServeMux::new(schema(&usage), PluginRegistry::new().with(usage.clone()))
        .await
        .unwrap();
    let first_id = usage.schema_id().unwrap();

    let replacement = Schema::build("Query", None, None)
        .register(Object::new("Query").field(Field::new(
            "version",
            TypeRef::named_nn(TypeRef::INT),
            |_| FieldFuture::new(async { Ok(Some(Value::from(2))) }),
        )))
        .extension(usage.clone())
        .finish()
        .unwrap();
    mux.replace_schema(replacement).await.unwrap();
    let second_id = usage.schema_id().unwrap();
    assert_ne!(first_id, second_id);

    let response = mux
        .clone()
        .into_router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/graphql")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"query":"{ version }"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    to_bytes(response.into_body(), 1024 * 1024).await.unwrap();

    usage.flush().await;
    let reports = drain(&mut rx);
    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].header.as_ref().unwrap().executable_schema_id,
        second_id
    );
}

async fn post_query(mux: &ServeMux, body: &'static str) {
    let response = mux
        .clone()
        .into_router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/graphql")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
}

#[tokio::test]
async fn test_extension_without_plugin_still_reports() {
    let (usage, mut rx) = reporting();
    let schema = schema(&usage);
    usage.set_schema(&schema.sdl());
    // The extension is installed, but nothing drains the mux's buffer
    let mux = ServeMux::new(schema, PluginRegistry::new()).await.unwrap();

    post_query(&mux, r#"[{"query":"{ hello }"},{"query":"query Greet { hello }"}]"#).await;

    usage.flush().await;
    // Each operation is reported on its own completion
    let reports = drain(&mut rx);
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.operation_count == 1));
    let mut keys: Vec<&str> = reports
        .iter()
        .flat_map(|r| r.traces_per_query.keys().map(String::as_str))
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["# -\n{hello}", "# Greet\nquery Greet{hello}"]);
}

#[tokio::test]
async fn test_request_keeps_id_of_schema_it_ran_on() {
    let (usage, mut rx) = reporting();
    let mux = ServeMux::new(schema(&usage), PluginRegistry::new().with(usage.clone()))
        .await
        .unwrap();
    let served_id = mux.schema_id();

    // A later schema announcement must not relabel requests on the served schema
    usage.set_schema("type Query { other: Int }");
    assert_ne!(usage.schema_id().as_deref(), Some(served_id.as_str()));

    post_query(&mux, r#"{"query":"{ hello }"}"#).await;

    usage.flush().await;
    let reports = drain(&mut rx);
    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].header.as_ref().unwrap().executable_schema_id,
        served_id.as_str()
    );
}
