//! BDD step definitions for the ingestion feature

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cucumber::{given, then, when};
use sensor_bridge::dispatcher::IngestOutcome;
use sensor_bridge::store::{LocalStore, ReadingStore};

use crate::world::{parse_channel, BridgeWorld};

#[given("an empty reading store")]
fn empty_store(world: &mut BridgeWorld) {
    world.store = Some(Arc::new(LocalStore::in_memory()));
}

#[given(expr = "an empty reading store whose clock reads {string}")]
fn empty_store_with_clock(world: &mut BridgeWorld, instant: String) {
    let instant: DateTime<Utc> = instant.parse().expect("invalid RFC 3339 instant");
    let store = LocalStore::in_memory().with_clock(Arc::new(move || instant));
    world.store = Some(Arc::new(store));
}

#[given(expr = "the median window is {int}")]
fn median_window(world: &mut BridgeWorld, window: usize) {
    world.config.median.window = window;
}

#[given("median persistence is enabled")]
fn median_persistence(world: &mut BridgeWorld) {
    world.config.median.persist = true;
}

#[given(expr = "{string} arrived on the {word} topic")]
async fn message_arrived(world: &mut BridgeWorld, payload: String, channel: String) {
    deliver(world, &payload, &channel).await;
}

#[when(expr = "{string} arrives on the {word} topic")]
async fn message_arrives(world: &mut BridgeWorld, payload: String, channel: String) {
    deliver(world, &payload, &channel).await;
}

async fn deliver(world: &mut BridgeWorld, payload: &str, channel: &str) {
    let topic = world.topic_for(channel);
    let outcome = world.dispatcher().handle(&topic, payload.as_bytes()).await;
    world.last_outcome = Some(outcome);
}

#[when(expr = "{string} arrives on the topic {string}")]
async fn message_arrives_on_topic(world: &mut BridgeWorld, payload: String, topic: String) {
    let outcome = world.dispatcher().handle(&topic, payload.as_bytes()).await;
    world.last_outcome = Some(outcome);
}

#[then(expr = "the latest {word} reading is {float}")]
async fn latest_reading_is(world: &mut BridgeWorld, channel: String, expected: f64) {
    let latest = world
        .store()
        .latest(parse_channel(&channel), 1)
        .await
        .unwrap();
    let reading = latest.first().expect("no reading stored");
    assert_eq!(
        reading.value, expected,
        "expected latest {} reading {}, got {}",
        channel, expected, reading.value
    );
}

#[then(expr = "the store holds {int} {word} reading(s)")]
async fn store_holds(world: &mut BridgeWorld, count: usize, channel: String) {
    assert_eq!(world.store().count(parse_channel(&channel)).await, count);
}

#[then("the message is dropped")]
fn message_dropped(world: &mut BridgeWorld) {
    match world.last_outcome.as_ref().expect("no message handled") {
        IngestOutcome::Dropped(_) => {}
        other => panic!("expected Dropped, got {:?}", other),
    }
}

#[then("the message is ignored")]
fn message_ignored(world: &mut BridgeWorld) {
    match world.last_outcome.as_ref().expect("no message handled") {
        IngestOutcome::Ignored => {}
        other => panic!("expected Ignored, got {:?}", other),
    }
}

#[then("the message is stored")]
fn message_stored(world: &mut BridgeWorld) {
    match world.last_outcome.as_ref().expect("no message handled") {
        IngestOutcome::Stored(_) => {}
        other => panic!("expected Stored, got {:?}", other),
    }
}

#[then(expr = "{int} median record(s) are stored")]
async fn median_records(world: &mut BridgeWorld, count: usize) {
    let medians = world.store().latest_medians(usize::MAX).await.unwrap();
    assert_eq!(medians.len(), count);
}
