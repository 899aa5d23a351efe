mod common;

use chrono::Duration as ChronoDuration;
use std::time::Duration;

use common::{seat, seats, wait_for_change, Harness, EVENT};
use eventu_seats::arbiter::ConflictReason;
use eventu_seats::client::{ClientError, Connection, SeatClient};
use eventu_seats::models::{SeatStatus, UserId};
use eventu_seats::services::SaleConfirmation;

fn user(id: &str) -> UserId {
    UserId::parse(id).unwrap()
}

async fn joined_client(harness: &Harness, id: &str) -> SeatClient {
    let client = SeatClient::connect(Connection::local(harness.service.clone()), user(id));
    client.join(EVENT).await.unwrap();
    client
}

#[tokio::test]
async fn two_users_race_for_one_seat_and_ttl_frees_it() {
    let harness = Harness::new();
    let u1 = joined_client(&harness, "U1").await;
    let u2 = joined_client(&harness, "U2").await;
    let a1 = seat("A1");

    assert!(u1.is_ready());
    assert_eq!(u2.status(&a1), Some(SeatStatus::Available));

    let mut u1_events = u1.subscribe();
    let mut u2_events = u2.subscribe();

    let first = u1.reserve(&[a1.clone()]).await.unwrap();
    assert_eq!(first.granted, vec![a1.clone()]);

    wait_for_change(&mut u2_events, &a1).await;
    let seen = u2.view(&a1).unwrap();
    assert_eq!(seen.status, SeatStatus::Reserved);
    assert_eq!(seen.holder, Some(user("U1")));
    assert!(!u2.select(&a1));

    let second = u2.reserve(&[a1.clone()]).await.unwrap();
    assert!(second.granted.is_empty());
    assert_eq!(second.conflicts[0].reason, ConflictReason::Reserved);

    wait_for_change(&mut u1_events, &a1).await;
    assert_eq!(u1.held_by_me(), vec![a1.clone()]);

    // 16 минут тишины: резерв протух, но до уборки место ещё занято
    harness.clock.advance(ChronoDuration::minutes(16));
    let retry = u2.reserve(&[a1.clone()]).await.unwrap();
    assert_eq!(retry.conflicts[0].reason, ConflictReason::Reserved);

    assert_eq!(harness.arbiter().sweep_expired(), 1);
    assert_eq!(harness.arbiter().sweep_expired(), 0);

    wait_for_change(&mut u1_events, &a1).await;
    wait_for_change(&mut u2_events, &a1).await;
    assert_eq!(u1.status(&a1), Some(SeatStatus::Available));
    assert_eq!(u2.status(&a1), Some(SeatStatus::Available));
    assert!(u1.held_by_me().is_empty());

    let late = u2.reserve(&[a1.clone()]).await.unwrap();
    assert_eq!(late.granted, vec![a1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_grant_each_seat_once() {
    let harness = Harness::new();
    let wanted = seats(&["A1", "A2", "B3"]);

    let mut tasks = Vec::new();
    for n in 0..16 {
        let client = joined_client(&harness, &format!("user-{n}")).await;
        let wanted = wanted.clone();
        tasks.push(tokio::spawn(async move { client.reserve(&wanted).await.unwrap() }));
    }

    let mut granted = Vec::new();
    let mut conflicts = 0;
    for task in tasks {
        let result = task.await.unwrap();
        granted.extend(result.granted);
        conflicts += result.conflicts.len();
    }

    granted.sort();
    let mut expected = wanted.clone();
    expected.sort();
    assert_eq!(granted, expected);
    assert_eq!(conflicts, 16 * wanted.len() - wanted.len());

    let availability = harness.arbiter().availability(EVENT).unwrap();
    assert_eq!(availability.reserved, 3);
}

#[tokio::test]
async fn observer_mirror_converges_to_authoritative_state() {
    let harness = Harness::new();
    let observer = joined_client(&harness, "observer").await;
    let service = harness.service.clone();

    service.reserve(EVENT, &seats(&["A1", "A2"]), "u1").await.unwrap();
    service.reserve(EVENT, &seats(&["A2", "B1"]), "u2").await.unwrap();
    service.release(EVENT, &seats(&["A1"]), "u1").await.unwrap();
    service
        .confirm_sale(SaleConfirmation {
            event_id: EVENT,
            seat_ids: seats(&["B1"]),
            user_id: "u2".to_string(),
            transaction_id: "tx-1".to_string(),
        })
        .await
        .unwrap();

    let expected = harness.arbiter().snapshot(EVENT).unwrap().seats;
    let converged = async {
        while observer.views() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), converged)
        .await
        .expect("mirror did not converge");

    assert_eq!(observer.status(&seat("B1")), Some(SeatStatus::Occupied));
    assert_eq!(observer.status(&seat("A1")), Some(SeatStatus::Available));
    assert_eq!(harness.store.sales().len(), 1);
}

#[tokio::test]
async fn reconnect_discards_mirror_and_resyncs() {
    let harness = Harness::new();
    let mut client = joined_client(&harness, "U1").await;
    let mut events = client.subscribe();

    client.reserve(&seats(&["A1"])).await.unwrap();
    wait_for_change(&mut events, &seat("A1")).await;
    assert!(client.select(&seat("A2")));

    client
        .reconnect(Connection::local(harness.service.clone()))
        .await
        .unwrap();

    assert!(client.is_ready());
    assert_eq!(client.event_id(), Some(EVENT));
    assert!(client.selected().is_empty());
    assert_eq!(client.held_by_me(), seats(&["A1"]));
}

#[tokio::test]
async fn disconnect_keeps_reservations() {
    let harness = Harness::new();
    let client = joined_client(&harness, "U1").await;
    client.reserve(&seats(&["C2"])).await.unwrap();
    drop(client);

    let view = harness.arbiter().seat(EVENT, &seat("C2")).unwrap().unwrap();
    assert_eq!(view.status, SeatStatus::Reserved);
    assert_eq!(view.holder, Some(user("U1")));
}

#[tokio::test]
async fn client_occupy_needs_server_permission() {
    let harness = Harness::new();
    let client = joined_client(&harness, "U1").await;
    client.reserve(&seats(&["A1"])).await.unwrap();
    let err = client.occupy(&seats(&["A1"]), "tx-9").await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)));

    let open = Harness::with_maps([eventu_seats::store::demo_map(EVENT, 1, 2)], true);
    let client = joined_client(&open, "U1").await;
    client.reserve(&seats(&["A1"])).await.unwrap();
    let result = client.occupy(&seats(&["A1"]), "tx-9").await.unwrap();
    assert_eq!(result.granted, seats(&["A1"]));
    assert_eq!(open.store.sales().len(), 1);
}

#[tokio::test]
async fn intents_need_a_joined_event() {
    let harness = Harness::new();
    let client = SeatClient::connect(Connection::local(harness.service.clone()), user("U1"));

    let err = client.reserve(&seats(&["A1"])).await.unwrap_err();
    assert!(matches!(err, ClientError::NotJoined));

    let err = client.join(404).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)));
    assert!(!client.is_ready());
}

#[tokio::test]
async fn invalid_seat_batch_changes_nothing() {
    let harness = Harness::new();
    let client = joined_client(&harness, "U1").await;

    let err = client.reserve(&seats(&["A1", "Z99"])).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(msg) if msg.contains("Z99")));
    assert_eq!(
        harness.arbiter().seat(EVENT, &seat("A1")).unwrap().unwrap().status,
        SeatStatus::Available
    );
}
