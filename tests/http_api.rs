mod common;

use serde_json::{json, Value};
use std::net::SocketAddr;

use common::{seat, wait_for_change, Harness, EVENT};
use eventu_seats::client::{Connection, SeatClient};
use eventu_seats::config::Config;
use eventu_seats::models::{SeatStatus, UserId};
use eventu_seats::{app, AppState};

async fn spawn_server(harness: &Harness) -> SocketAddr {
    let vars = [
        ("SEATS_STORE", "memory"),
        ("SALES_WEBHOOK_USER", "payments"),
        ("SALES_WEBHOOK_PASSWORD", "secret"),
    ];
    let config = Config::from_lookup(|name| {
        vars.iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    })
    .unwrap();

    let state = AppState::new(harness.service.clone(), config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn health_and_seat_queries() {
    let harness = Harness::new();
    let addr = spawn_server(&harness).await;
    let http = reqwest::Client::new();

    let health = http.get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(health.text().await.unwrap(), "OK");

    let seats: Value = http
        .get(format!("http://{addr}/api/events/{EVENT}/seats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(seats["eventId"], EVENT);
    assert_eq!(seats["seats"].as_array().unwrap().len(), 12);
    assert_eq!(seats["seats"][0]["status"], "available");

    let layout: Value = http
        .get(format!("http://{addr}/api/events/{EVENT}/layout"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(layout["sections"].as_array().unwrap().len(), 2);

    let missing = http
        .get(format!("http://{addr}/api/events/999/seats"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn reserve_then_confirm_sale_over_http() {
    let harness = Harness::new();
    let addr = spawn_server(&harness).await;
    let http = reqwest::Client::new();
    let base = format!("http://{addr}/api");

    let reserved: Value = http
        .post(format!("{base}/events/{EVENT}/seats/reserve"))
        .json(&json!({ "seatIds": ["A1", "A2"], "userId": "u1" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reserved["granted"], json!(["A1", "A2"]));
    assert_eq!(reserved["action"], "reserve");

    let empty = http
        .post(format!("{base}/events/{EVENT}/seats/reserve"))
        .json(&json!({ "seatIds": [], "userId": "u1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), reqwest::StatusCode::BAD_REQUEST);

    let sale = json!({
        "eventId": EVENT,
        "seatIds": ["A1"],
        "userId": "u1",
        "transactionId": "tx-100"
    });

    let anonymous = http
        .post(format!("{base}/sales/confirm"))
        .json(&sale)
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), reqwest::StatusCode::UNAUTHORIZED);

    let wrong = http
        .post(format!("{base}/sales/confirm"))
        .basic_auth("payments", Some("guess"))
        .json(&sale)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), reqwest::StatusCode::UNAUTHORIZED);

    let confirmed: Value = http
        .post(format!("{base}/sales/confirm"))
        .basic_auth("payments", Some("secret"))
        .json(&sale)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(confirmed["granted"], json!(["A1"]));

    let released: Value = http
        .post(format!("{base}/events/{EVENT}/seats/release"))
        .json(&json!({ "seatIds": ["A1", "A2"], "userId": "u1" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(released["granted"], json!(["A2"]));
    assert_eq!(released["skipped"], json!(["A1"]));

    let availability: Value = http
        .get(format!("{base}/events/{EVENT}/availability"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(availability["occupied"], 1);
    assert_eq!(availability["reserved"], 0);
    assert_eq!(availability["available"], 11);
    assert_eq!(harness.store.sales().len(), 1);
}

#[tokio::test]
async fn websocket_client_sees_http_reservations() {
    let harness = Harness::new();
    let addr = spawn_server(&harness).await;

    let connection = Connection::websocket(&format!("ws://{addr}/api/ws"))
        .await
        .unwrap();
    let client = SeatClient::connect(connection, UserId::parse("watcher").unwrap());
    client.join(EVENT).await.unwrap();
    let mut events = client.subscribe();

    reqwest::Client::new()
        .post(format!("http://{addr}/api/events/{EVENT}/seats/reserve"))
        .json(&json!({ "seatIds": ["B2"], "userId": "buyer" }))
        .send()
        .await
        .unwrap();

    wait_for_change(&mut events, &seat("B2")).await;
    let view = client.view(&seat("B2")).unwrap();
    assert_eq!(view.status, SeatStatus::Reserved);
    assert_eq!(view.holder.unwrap().as_str(), "buyer");

    let own = client.reserve(&[seat("B3")]).await.unwrap();
    assert_eq!(own.granted, vec![seat("B3")]);
    wait_for_change(&mut events, &seat("B3")).await;
    assert_eq!(client.held_by_me(), vec![seat("B3")]);
}
