//! End-to-end tests of ingestion through the query surface

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use sensor_bridge::api::build_router;
use sensor_bridge::bus::{run_ingestion, BusMessage, MessageSource};
use sensor_bridge::channel::{Channel, TopicMap};
use sensor_bridge::config::{Config, TemperatureView};
use sensor_bridge::correction::Corrector;
use sensor_bridge::dispatcher::Dispatcher;
use sensor_bridge::localtime::Localizer;
use sensor_bridge::median::MedianAggregator;
use sensor_bridge::query::QueryService;
use sensor_bridge::store::{LocalStore, ReadingStore};

struct ScriptedSource {
    messages: VecDeque<BusMessage>,
}

impl ScriptedSource {
    fn new(messages: &[(&str, &str)]) -> Self {
        Self {
            messages: messages
                .iter()
                .map(|(topic, payload)| BusMessage {
                    topic: topic.to_string(),
                    payload: payload.as_bytes().to_vec(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn recv(&mut self) -> Option<BusMessage> {
        self.messages.pop_front()
    }
}

struct Pipeline {
    store: Arc<dyn ReadingStore>,
    dispatcher: Dispatcher,
    query: Arc<QueryService>,
}

fn pipeline(store: Arc<dyn ReadingStore>, config: &Config) -> Pipeline {
    let aggregator = MedianAggregator::new(config.median.window);
    let retry = config.store.retry_policy();
    let dispatcher = Dispatcher::new(
        TopicMap::new(&config.bus.topics),
        Corrector::new(config.correction),
        aggregator,
        Arc::clone(&store),
        retry,
    )
    .with_median_persistence(config.median.persist);
    let query = Arc::new(
        QueryService::new(
            Arc::clone(&store),
            aggregator,
            Localizer::new(&config.query.timezone).unwrap(),
            retry,
        )
        .with_temperature_view(config.query.temperature_view)
        .with_history_size(config.query.history_size),
    );
    Pipeline {
        store,
        dispatcher,
        query,
    }
}

async fn get_json(pipeline: &Pipeline, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = build_router(Arc::clone(&pipeline.query))
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_messages_flow_to_http() {
    let p = pipeline(Arc::new(LocalStore::in_memory()), &Config::default());
    let mut source = ScriptedSource::new(&[
        ("temperatura", "25.0"),
        ("temperatura", "27.0"),
        ("temperatura", "3.0"),
        ("humedad", "45"),
        ("humedad_tierra", "512"),
    ]);

    let stats = run_ingestion(&mut source, &p.dispatcher, CancellationToken::new()).await;
    assert_eq!(stats.stored, 5);

    let (status, json) = get_json(&p, "/temperatura").await;
    assert_eq!(status, StatusCode::OK);
    // 3.0 - 5 is a fault, replaced by the median of 20 and 22
    assert_eq!(json["temperature"], 21.0);
    assert_eq!(json["median"], 21.0);
    assert_eq!(json["humidity"], 65.0);
    assert_eq!(json["soil_moisture"], 512.0);

    let (status, json) = get_json(&p, "/humedad_tierra").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_malformed_payload_leaves_store_unchanged() {
    let p = pipeline(Arc::new(LocalStore::in_memory()), &Config::default());
    let mut source = ScriptedSource::new(&[
        ("humedad", "40"),
        ("humedad", "{\"value\": 41}"),
        ("humedad", ""),
        ("humedad", "42"),
    ]);

    let stats = run_ingestion(&mut source, &p.dispatcher, CancellationToken::new()).await;
    assert_eq!(stats.stored, 2);
    assert_eq!(stats.dropped, 2);

    let latest = p.query.latest_n(Channel::Humidity, 10).await.unwrap();
    let values: Vec<f64> = latest.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![62.0, 60.0]);
}

#[tokio::test]
async fn test_unknown_topics_are_a_no_op() {
    let p = pipeline(Arc::new(LocalStore::in_memory()), &Config::default());
    let mut source = ScriptedSource::new(&[("presion", "1013"), ("viento", "12")]);

    let stats = run_ingestion(&mut source, &p.dispatcher, CancellationToken::new()).await;
    assert_eq!(stats.ignored, 2);
    for channel in Channel::ALL {
        assert!(p.store.latest(channel, 10).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_empty_store_reports_insufficient_data() {
    let p = pipeline(Arc::new(LocalStore::in_memory()), &Config::default());

    for uri in ["/temperatura", "/humedad", "/humedad_tierra", "/mediana"] {
        let (status, json) = get_json(&p, uri).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{uri}");
        assert_eq!(json["error"], "insufficient_data", "{uri}");
    }
}

#[tokio::test]
async fn test_list_view_with_window_of_six() {
    let mut config = Config::default();
    config.median.window = 6;
    config.query.temperature_view = TemperatureView::List;
    let p = pipeline(Arc::new(LocalStore::in_memory()), &config);

    for raw in 20..28 {
        p.dispatcher
            .on_message("temperatura", raw.to_string().as_bytes())
            .await
            .unwrap();
    }
    p.dispatcher.on_message("humedad", b"50").await.unwrap();

    let (status, json) = get_json(&p, "/temperatura").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["temperatures"],
        serde_json::json!([22.0, 21.0, 20.0, 19.0, 18.0, 17.0])
    );
    assert_eq!(json["temperature_timestamps"].as_array().unwrap().len(), 6);
    assert_eq!(json["median"], 19.5);
}

#[tokio::test]
async fn test_journal_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("readings.jsonl");
    let mut config = Config::default();
    config.median.persist = true;

    {
        let store = Arc::new(LocalStore::open(&journal).await.unwrap());
        let p = pipeline(store, &config);
        p.dispatcher.on_message("temperatura", b"26").await.unwrap();
        p.dispatcher.on_message("humedad", b"30").await.unwrap();
    }

    let store = Arc::new(LocalStore::open(&journal).await.unwrap());
    let p = pipeline(store, &config);

    let (status, json) = get_json(&p, "/temperatura").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["temperature"], 21.0);
    assert_eq!(json["humidity"], 50.0);

    let (status, json) = get_json(&p, "/mediana").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[0]["median"], 21.0);
}
