mod common;

use std::time::{Duration, Instant};

use actix_http::header::AUTHORIZATION;
use serde_json::{Value, json};

use common::{TEST_TOKEN, TestEdge, spawn_edge};
use wrist_edge::hub::State;
use wrist_edge::hub::value::AttrValue;

fn bearer() -> (actix_http::header::HeaderName, String) {
    (AUTHORIZATION, format!("Bearer {TEST_TOKEN}"))
}

async fn poll(edge: &TestEdge, body: Value) -> (u16, Option<Value>) {
    let mut resp = edge
        .srv
        .post("/api/watch/updates")
        .insert_header(bearer())
        // Outlive the longest server-side poll clamp.
        .timeout(Duration::from_secs(70))
        .send_json(&body)
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.ok();
    (status, body)
}

async fn wait_for_cursor(edge: &TestEdge, cursor: u64) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while edge.log.cursor() < cursor {
        assert!(Instant::now() < deadline, "ingest task did not catch up");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[actix_web::test]
async fn unauthenticated_poll_is_rejected() {
    let edge = spawn_edge(100).await;
    let resp = edge
        .srv
        .post("/api/watch/updates")
        .send_json(&json!({"watch_id": "w1", "config_hash": "h1"}))
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
}

#[actix_web::test]
async fn invalid_json_body_is_a_400_with_message() {
    let edge = spawn_edge(100).await;
    let mut resp = edge
        .srv
        .post("/api/watch/updates")
        .insert_header(bearer())
        .insert_header(("Content-Type", "application/json"))
        .send_body("{not json")
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body = resp.json::<Value>().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("Invalid JSON"));
}

#[actix_web::test]
async fn empty_watch_id_is_rejected() {
    let edge = spawn_edge(100).await;
    let (status, _) = poll(&edge, json!({"watch_id": "", "config_hash": "h1"})).await;
    assert_eq!(status, 400);
}

#[actix_web::test]
async fn first_poll_with_entities_and_empty_since_returns_snapshot() {
    let edge = spawn_edge(100).await;
    edge.hub.set_state(
        State::new("light.a", "on").with_attribute("brightness", AttrValue::Int(128)),
    );
    wait_for_cursor(&edge, 1).await;

    let (status, body) = poll(
        &edge,
        json!({
            "watch_id": "w1",
            "config_hash": "h1",
            "since": "",
            "entities": ["light.a", "light.not_yet_created"],
        }),
    )
    .await;
    let body = body.unwrap();
    assert_eq!(status, 200);
    // One row per subscribed entity that exists; missing ones skipped.
    assert_eq!(body["events"].as_array().unwrap().len(), 1);
    assert_eq!(body["events"][0]["entity_id"], "light.a");
    assert_eq!(body["next_cursor"], "1");
    assert_eq!(body["need_entities"], false);
    assert_eq!(body["resync_required"], false);
    assert!(body["capabilities"].as_array().unwrap().len() > 1);
}

#[actix_web::test]
async fn synced_client_with_no_changes_gets_204_after_timeout() {
    let edge = spawn_edge(100).await;
    edge.hub.set_state(State::new("light.a", "on"));
    wait_for_cursor(&edge, 1).await;

    poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "", "entities": ["light.a"]}),
    )
    .await;

    let started = Instant::now();
    let (status, body) = poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "1", "timeout": 5}),
    )
    .await;
    assert_eq!(status, 204);
    assert!(body.is_none());
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(6));
}

#[actix_web::test]
#[tracing_test::traced_test]
async fn ingest_during_wait_wakes_the_poll() {
    let edge = spawn_edge(100).await;
    edge.hub.set_state(State::new("light.a", "off"));
    wait_for_cursor(&edge, 1).await;

    poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "", "entities": ["light.a"]}),
    )
    .await;

    let waiting = {
        let srv = &edge.srv;
        srv.post("/api/watch/updates")
            .insert_header(bearer())
            .timeout(Duration::from_secs(70))
            .send_json(
                &json!({"watch_id": "w1", "config_hash": "h1", "since": "1", "timeout": 30}),
            )
    };
    let trigger = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        edge.hub.set_state(State::new("light.a", "on"));
        Instant::now()
    };

    let (resp, triggered_at) = tokio::join!(waiting, trigger);
    let mut resp = resp.unwrap();
    let woke_after = triggered_at.elapsed();

    assert_eq!(resp.status().as_u16(), 200);
    let body = resp.json::<Value>().await.unwrap();
    assert_eq!(body["events"].as_array().unwrap().len(), 1);
    assert_eq!(body["events"][0]["entity_id"], "light.a");
    assert_eq!(body["events"][0]["state"], "on");
    assert_eq!(body["next_cursor"], "2");
    assert!(
        woke_after < Duration::from_secs(2),
        "long-poll should wake promptly, took {woke_after:?}"
    );
}

#[actix_web::test]
async fn config_change_without_entities_asks_for_the_list() {
    let edge = spawn_edge(100).await;
    poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "", "entities": ["light.a"]}),
    )
    .await;

    let (status, body) = poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h2", "since": "0", "timeout": 5}),
    )
    .await;
    let body = body.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body["need_entities"], true);
    assert_eq!(body["events"].as_array().unwrap().len(), 0);

    // Still unsynced until the list arrives.
    let (_, body) = poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h2", "since": "0", "timeout": 5}),
    )
    .await;
    assert_eq!(body.unwrap()["need_entities"], true);
}

#[actix_web::test]
async fn overflowed_ring_forces_resync() {
    let edge = spawn_edge(50).await;
    poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "", "entities": ["light.a"]}),
    )
    .await;

    for i in 0..60 {
        edge.hub
            .set_state(State::new("sensor.unrelated", &format!("{i}")));
    }
    wait_for_cursor(&edge, 60).await;

    let (status, body) = poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "0"}),
    )
    .await;
    let body = body.unwrap();
    assert_eq!(status, 410);
    assert_eq!(body["resync_required"], true);
    assert_eq!(body["next_cursor"], "60");
}

#[actix_web::test]
async fn non_numeric_cursor_forces_resync() {
    let edge = spawn_edge(100).await;
    poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "", "entities": ["light.a"]}),
    )
    .await;
    let (status, body) = poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "abc"}),
    )
    .await;
    assert_eq!(status, 410);
    assert_eq!(body.unwrap()["resync_required"], true);
}

#[actix_web::test]
async fn events_are_filtered_to_the_subscription() {
    let edge = spawn_edge(100).await;
    poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "", "entities": ["light.a"]}),
    )
    .await;

    edge.hub.set_state(State::new("light.a", "on"));
    edge.hub.set_state(State::new("sensor.noise", "1"));
    edge.hub.set_state(State::new("light.b", "on"));
    wait_for_cursor(&edge, 3).await;

    let (status, body) = poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "0"}),
    )
    .await;
    let body = body.unwrap();
    assert_eq!(status, 200);
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["entity_id"], "light.a");
}

#[actix_web::test]
async fn slim_mode_strips_unlisted_attributes() {
    let edge = spawn_edge(100).await;
    poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "", "entities": ["light.a"]}),
    )
    .await;
    edge.hub.set_state(
        State::new("light.a", "on")
            .with_attribute("brightness", AttrValue::Int(128))
            .with_attribute("icon", AttrValue::String("mdi:lamp".into())),
    );
    wait_for_cursor(&edge, 1).await;

    let (status, body) = poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "0", "slim": true}),
    )
    .await;
    assert_eq!(status, 200);
    let body = body.unwrap();
    let attributes = body["events"][0]["new_state"]["attributes"]
        .as_object()
        .unwrap();
    assert!(attributes.contains_key("brightness"));
    assert!(!attributes.contains_key("icon"));
}

#[actix_web::test]
async fn force_delta_returns_summary_without_waiting() {
    let edge = spawn_edge(100).await;
    edge.hub.set_state(State::new("light.a", "on"));
    wait_for_cursor(&edge, 1).await;
    poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "", "entities": ["light.a"]}),
    )
    .await;

    let started = Instant::now();
    let (status, body) = poll(
        &edge,
        json!({
            "watch_id": "w1",
            "config_hash": "h1",
            "since": "1",
            "force_delta": true,
            "timeout": 45,
        }),
    )
    .await;
    let body = body.unwrap();
    assert_eq!(status, 200);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(body["events"].as_array().unwrap().len(), 0);
    assert_eq!(body["info_summary"]["lights"]["count"], 1);
}

#[actix_web::test]
async fn device_token_in_poll_piggybacks_registration() {
    let edge = spawn_edge(100).await;
    let (status, _) = poll(
        &edge,
        json!({
            "watch_id": "w1",
            "config_hash": "h1",
            "device_token": "apns-token-1",
            "apns_environment": "development",
        }),
    )
    .await;
    assert_eq!(status, 200);

    let entry = edge.push_tokens.get("w1").expect("token registered");
    assert_eq!(entry.device_token, "apns-token-1");
    assert_eq!(entry.platform, "watchos");
    assert_eq!(
        entry.environment,
        wrist_edge::types::ApnsEnvironment::Development
    );
}

#[actix_web::test]
async fn summary_endpoint_reports_counts_and_details() {
    let edge = spawn_edge(100).await;
    edge.hub.set_state(State::new("light.a", "on"));
    edge.hub.set_state(State::new("light.b", "off"));
    edge.hub.set_state(
        State::new("sensor.watch_battery", "12")
            .with_attribute("device_class", AttrValue::String("battery".into())),
    );

    let mut resp = edge
        .srv
        .post("/api/wrist_assistant/summary")
        .insert_header(bearer())
        .send_json(&json!({"include_details": true, "battery_threshold": 20}))
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body = resp.json::<Value>().await.unwrap();
    assert_eq!(body["info_summary"]["lights"]["count"], 1);
    assert_eq!(body["info_summary"]["lights"]["total"], 2);
    assert_eq!(body["info_summary"]["battery"]["count"], 1);
    assert_eq!(
        body["info_summary"]["battery"]["details"][0]["level"],
        12.0
    );
    assert!(body["capabilities"].as_array().unwrap().len() > 1);
}

#[actix_web::test]
async fn notifications_register_endpoint_stores_tokens() {
    let edge = spawn_edge(100).await;
    let resp = edge
        .srv
        .post("/api/wrist_assistant/notifications/register")
        .insert_header(bearer())
        .send_json(&json!({"watch_id": "w9", "device_token": "tok-9"}))
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let entry = edge.push_tokens.get("w9").unwrap();
    assert_eq!(entry.device_token, "tok-9");
    assert_eq!(
        entry.environment,
        wrist_edge::types::ApnsEnvironment::Production
    );
}

#[actix_web::test]
async fn force_resync_drops_sessions_and_requires_new_entity_lists() {
    let edge = spawn_edge(100).await;
    poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "", "entities": ["light.a"]}),
    )
    .await;

    let resp = edge
        .srv
        .post("/internal-backstage/force-resync")
        .insert_header(bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    // The rebuilt session has no subscription until the list arrives.
    let (status, body) = poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "0", "timeout": 5}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body.unwrap()["need_entities"], true);
}

#[actix_web::test]
async fn backstage_status_excludes_probe_sessions() {
    let edge = spawn_edge(100).await;
    poll(
        &edge,
        json!({"watch_id": "w1", "config_hash": "h1", "since": "", "entities": ["light.a"]}),
    )
    .await;
    poll(
        &edge,
        json!({"watch_id": "__probe__", "config_hash": "h1", "since": "", "entities": []}),
    )
    .await;

    let mut resp = edge
        .srv
        .get("/internal-backstage/status")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body = resp.json::<Value>().await.unwrap();
    assert_eq!(body["active_watches"], 1);
    assert_eq!(body["monitored_entities"], 1);
}
