//! Tests for the Session module

use super::*;
use crate::domain::catalog::{InMemoryCatalog, ProductDetails};
use crate::domain::epc::Sgtin96Decoder;
use crate::io::egress_channel::{create_egress_channel, EgressMessage};
use crate::io::notifier::MemoryNotifier;
use serde_json::{json, Value};

const APPLE: &str = "00000000000001";
const RED_BULL: &str = "00000000735797";
const RED_BULL_EPC: &str = "301400000047DAC000003039";
const T0: i64 = 1_700_000_000_000;

/// Test harness that keeps the egress receiver alive so `try_send` succeeds
struct TestSession {
    session: Session,
    notifier: Arc<MemoryNotifier>,
    egress_rx: mpsc::Receiver<EgressMessage>,
}

impl std::ops::Deref for TestSession {
    type Target = Session;
    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl std::ops::DerefMut for TestSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_product(APPLE, ProductDetails::new("Apple", 10.0, 11.0, false))
        .with_product(RED_BULL, ProductDetails::new("Red Bull", 0.5, 0.6, true))
}

fn create_test_session() -> TestSession {
    create_test_session_with_config(Config::default())
}

fn create_test_session_with_config(config: Config) -> TestSession {
    let notifier = Arc::new(MemoryNotifier::new());
    let (egress_sender, egress_rx) = create_egress_channel(256, config.site_id().to_string());
    let collaborators = Collaborators {
        catalog: Arc::new(catalog()),
        epc: Arc::new(Sgtin96Decoder),
        notifier: notifier.clone(),
    };
    let session = Session::new(
        SessionSettings::from_config(&config),
        collaborators,
        Arc::new(Metrics::new()),
        Some(egress_sender),
    );
    TestSession { session, notifier, egress_rx }
}

fn pos(event: &str, value: Value) -> RawReading {
    RawReading::new("device-pos-rest", event, value)
}

fn basket_open() -> RawReading {
    pos("basket-open", json!({"basket_id": "b-1", "lane_id": "1", "event_time": T0}))
}

fn basket_close() -> RawReading {
    pos("basket-close", json!({"basket_id": "b-1", "lane_id": "1", "event_time": T0}))
}

fn scan(product_id: &str, name: &str, quantity: f64, unit: &str, event_time: i64) -> RawReading {
    pos(
        "scanned-item",
        json!({
            "product_id": product_id,
            "product_name": name,
            "quantity": quantity,
            "quantity_unit": unit,
            "unit_price": 1.99,
            "basket_id": "b-1",
            "lane_id": "1",
            "event_time": event_time,
        }),
    )
}

fn remove(product_id: &str, quantity: f64) -> RawReading {
    pos("remove-item", json!({"product_id": product_id, "quantity": quantity, "quantity_unit": "EA"}))
}

fn weight(total: f64, event_time: i64) -> RawReading {
    RawReading::new(
        "device-scale",
        "weight",
        json!({"lane_id": "1", "scale_id": "s-1", "total": total, "units": "lbs", "event_time": event_time}),
    )
}

fn cv(name: &str, roi: &str, action: &str, event_time: i64) -> RawReading {
    RawReading::new(
        "device-cv-roi-mqtt",
        "cv-roi-event",
        json!({"lane_id": "1", "product_name": name, "roi_name": roi, "roi_action": action, "event_time": event_time}),
    )
}

fn rfid(epc: &str, roi: &str, action: &str, event_time: i64) -> RawReading {
    RawReading::new(
        "device-rfid-roi-mqtt",
        "rfid-roi-event",
        json!({"lane_id": "1", "epc": epc, "roi_name": roi, "roi_action": action, "event_time": event_time}),
    )
}

fn apply_all(session: &mut Session, readings: &[RawReading]) {
    for reading in readings {
        session.process_reading(reading).unwrap();
    }
}

// ============================================================================
// Admission
// ============================================================================

#[test]
fn test_scan_before_basket_open_is_out_of_order() {
    let mut session = create_test_session();
    let err = session.process_reading(&scan(APPLE, "Apple", 1.0, "EA", T0)).unwrap_err();
    assert!(matches!(err, ProcessError::OutOfOrder(ref kind) if kind == "scanned-item"));
    assert!(session.ledger.is_empty());
    assert_eq!(session.metrics.totals().out_of_order, 1);
}

#[test]
fn test_unknown_device_is_rejected() {
    let mut session = create_test_session();
    let reading = RawReading::new("device-printer-rest", "basket-open", json!({}));
    let err = session.process_reading(&reading).unwrap_err();
    assert!(matches!(err, ProcessError::UnknownDevice(ref d) if d == "device-printer-rest"));
    assert!(!session.lifecycle.is_open());
    assert_eq!(session.metrics.totals().unknown_device, 1);
}

#[test]
fn test_unknown_event_name_is_out_of_order() {
    let mut session = create_test_session();
    let err = session.process_reading(&pos("price-override", json!({}))).unwrap_err();
    assert!(matches!(err, ProcessError::OutOfOrder(ref kind) if kind == "price-override"));
}

#[test]
fn test_malformed_payload_leaves_lifecycle_unchanged() {
    let mut session = create_test_session();
    apply_all(&mut session, &[basket_open()]);

    let bad = pos("scanned-item", json!({"product_id": APPLE, "quantity": "four"}));
    let err = session.process_reading(&bad).unwrap_err();
    assert!(matches!(err, ProcessError::Malformed { .. }));
    assert!(!session.lifecycle.has_scanned());
    assert!(session.ledger.is_empty());

    // Nothing scanned yet, so payment cannot start
    let err = session.process_reading(&pos("payment-start", json!({}))).unwrap_err();
    assert!(matches!(err, ProcessError::OutOfOrder(_)));
    assert_eq!(session.metrics.totals().malformed, 1);
}

#[test]
fn test_stream_event_mismatch_is_rejected() {
    let mut session = create_test_session();
    apply_all(&mut session, &[basket_open()]);

    let err = session.process_reading(&pos("weight", json!({"total": 1.0}))).unwrap_err();
    assert!(matches!(err, ProcessError::UnknownPosEvent(ref kind) if kind == "weight"));

    let reading = RawReading::new("device-scale-rest", "basket-close", json!({}));
    let err = session.process_reading(&reading).unwrap_err();
    assert!(matches!(err, ProcessError::UnexpectedEvent { stream: "scale", .. }));
    assert!(session.lifecycle.is_open());
}

#[test]
fn test_weight_after_payment_start_is_out_of_order() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[
            basket_open(),
            scan("4011", "Bananas", 2.0, "lbs", T0),
            weight(2.0, T0 + 1),
            pos("payment-start", json!({})),
        ],
    );
    let err = session.process_reading(&weight(4.0, T0 + 2)).unwrap_err();
    assert!(matches!(err, ProcessError::OutOfOrder(_)));
    assert_eq!(session.scale.len(), 1);
}

// ============================================================================
// Scale
// ============================================================================

#[test]
fn test_scale_sequence_confirms_group_drop() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[
            basket_open(),
            weight(10.1, 1),
            weight(20.6, 2),
            scan(APPLE, "Apple", 4.0, "EA", 3),
        ],
    );
    // A scan alone never pulls in earlier weight
    assert_eq!(session.scale.suspect_count(), 2);
    assert!(!session.ledger.tail().unwrap().scale_confirmed);

    apply_all(&mut session, &[weight(31.6, 3)]);
    assert_eq!(session.scale.suspect_count(), 0);
    assert_eq!(session.ledger.tail().unwrap().scale_items.len(), 3);

    apply_all(&mut session, &[weight(52.6, 4), weight(62.6, 5)]);
    let tail = session.ledger.tail().unwrap();
    assert_eq!(tail.scale_items.len(), 4);
    assert!(tail.scale_confirmed);
    assert_eq!(session.scale.suspect_count(), 1);

    apply_all(&mut session, &[pos("payment-start", json!({}))]);
    assert_eq!(session.notifier.count(), 1);
    let payload = session.notifier.last_json().unwrap();
    let suspect = &payload["scale_suspect_list"]["4"];
    assert!((suspect["delta"].as_f64().unwrap() - 21.0).abs() < 1e-6);
    assert_eq!(session.metrics.suspect_lists_emitted(), 1);
}

#[test]
fn test_merged_scan_rechecks_scale_then_partial_remove_demotes() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[basket_open(), scan(APPLE, "Apple", 1.0, "EA", T0), weight(10.5, T0 + 1)],
    );
    assert!(session.ledger.tail().unwrap().scale_confirmed);

    // A repeat scan raises the quantity and reopens the weight window
    apply_all(&mut session, &[scan(APPLE, "Apple", 1.0, "EA", T0 + 2)]);
    let tail = session.ledger.tail().unwrap();
    assert_eq!(session.ledger.len(), 1);
    assert_eq!(tail.quantity, 2.0);
    assert_eq!(tail.scale_items.len(), 1);
    assert!(!tail.scale_confirmed);

    apply_all(&mut session, &[weight(21.0, T0 + 3)]);
    let tail = session.ledger.tail().unwrap();
    assert_eq!(tail.scale_items.len(), 2);
    assert!(tail.scale_confirmed);
    assert_eq!(session.scale.suspect_count(), 0);

    // Dropping back to one unit demotes the newest drop to suspect
    apply_all(&mut session, &[remove(APPLE, 1.0)]);
    let tail = session.ledger.tail().unwrap();
    assert_eq!(tail.quantity, 1.0);
    assert_eq!(tail.scale_items.len(), 1);
    assert!(tail.scale_confirmed);
    assert_eq!(session.scale.suspect_count(), 1);
    let suspect = session.scale.suspects().next().unwrap();
    assert_eq!(suspect.event_time, T0 + 3);
    assert!(suspect.associated.is_none());
}

#[test]
fn test_scan_lookup_failure_drops_scan() {
    let mut session = create_test_session();
    apply_all(&mut session, &[basket_open()]);
    let err = session.process_reading(&scan("999", "Mystery", 1.0, "EA", T0)).unwrap_err();
    assert!(matches!(err, ProcessError::Lookup(_)));
    assert!(session.ledger.is_empty());
    assert_eq!(session.metrics.totals().lookup_failures, 1);
}

#[test]
fn test_bulk_scan_skips_catalog() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[basket_open(), scan("4011", "Bananas", 2.0, "lbs", T0), weight(2.01, T0 + 1)],
    );
    let tail = session.ledger.tail().unwrap();
    assert_eq!(tail.product_id, "00000000004011");
    assert!(tail.scale_confirmed);

    apply_all(&mut session, &[pos("payment-start", json!({}))]);
    assert_eq!(session.notifier.count(), 0);
}

// ============================================================================
// CV
// ============================================================================

#[test]
fn test_cv_object_confirms_aligned_scan() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[
            basket_open(),
            cv("Apple", "Scanner", "ENTERED", T0),
            scan(APPLE, "Apple", 1.0, "EA", T0 + 11),
        ],
    );
    let tail = session.ledger.tail().unwrap();
    assert!(tail.cv_confirmed);
    assert_eq!(tail.cv_items.len(), 1);
    assert!(session.cv_objects.current()[0].associated.is_some());
}

#[test]
fn test_late_cv_object_reconciles_open_entries() {
    let mut session = create_test_session();
    apply_all(&mut session, &[basket_open(), scan(APPLE, "Apple", 1.0, "EA", T0)]);
    assert!(!session.ledger.tail().unwrap().cv_confirmed);

    apply_all(&mut session, &[cv("Apple", "Scanner", "ENTERED", T0 + 200)]);
    assert!(session.ledger.tail().unwrap().cv_confirmed);
}

#[test]
fn test_cv_object_confirms_repeated_product_lines() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[
            basket_open(),
            cv("Apple", "Scanner", "ENTERED", T0),
            scan(APPLE, "Apple", 1.0, "EA", T0 + 1),
            scan("4011", "Bananas", 2.0, "lbs", T0 + 2),
            scan(APPLE, "Apple", 1.0, "EA", T0 + 3),
        ],
    );
    let flags: Vec<(&str, bool, usize)> = session
        .ledger
        .iter()
        .map(|e| (e.product_name.as_str(), e.cv_confirmed, e.cv_items.len()))
        .collect();
    assert_eq!(flags, vec![("Apple", true, 1), ("Bananas", false, 0), ("Apple", true, 1)]);
    let first = session.ledger.iter().next().unwrap().id;
    assert_eq!(session.cv_objects.current()[0].associated, Some(first));

    // Removing the first line hands the object to the line that still holds it
    apply_all(&mut session, &[remove(APPLE, 1.0)]);
    assert_eq!(session.ledger.len(), 2);
    let remaining = session.ledger.tail().unwrap();
    assert!(remaining.cv_confirmed);
    assert_eq!(session.cv_objects.current()[0].associated, Some(remaining.id));
    assert!(session.suspects().cv_suspect_list.is_empty());
}

#[test]
fn test_misaligned_cv_object_is_reported() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[
            basket_open(),
            cv("Apple", "Scanner", "ENTERED", T0),
            scan(APPLE, "Apple", 1.0, "EA", T0 + 10_000),
            pos("payment-start", json!({})),
        ],
    );
    assert!(!session.ledger.tail().unwrap().cv_confirmed);
    let payload = session.notifier.last_json().unwrap();
    let list = payload["cv_suspect_list"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["product_name"], "Apple");
    assert_eq!(list[0]["rois"]["Scanner"]["at_location"], true);
}

#[test]
fn test_negative_alignment_disables_time_check() {
    let config = Config::default().with_cv_time_alignment_ms(-1);
    let mut session = create_test_session_with_config(config);
    apply_all(
        &mut session,
        &[
            basket_open(),
            cv("Apple", "Scanner", "ENTERED", T0),
            scan(APPLE, "Apple", 1.0, "EA", T0 + 600_000),
        ],
    );
    assert!(session.ledger.tail().unwrap().cv_confirmed);
}

#[test]
fn test_cv_unknown_action_still_tracks_object() {
    let mut session = create_test_session();
    apply_all(&mut session, &[basket_open(), cv("Apple", "Scanner", "HOVERED", T0)]);
    let obj = &session.cv_objects.current()[0];
    assert_eq!(obj.roi_action, "HOVERED");
    assert!(obj.rois.is_empty());
}

// ============================================================================
// RFID
// ============================================================================

#[test]
fn test_rfid_tag_confirms_eligible_scan() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[
            basket_open(),
            rfid(RED_BULL_EPC, "Bagging", "ENTERED", T0),
            scan("735797", "Red Bull", 1.0, "EA", T0 + 5),
        ],
    );
    let tag = &session.rfid_tags.current()[0];
    assert_eq!(tag.upc, RED_BULL);
    assert_eq!(tag.product_name, "Red Bull");
    let tail = session.ledger.tail().unwrap();
    assert!(tail.rfid_confirmed);
}

#[test]
fn test_late_rfid_tag_is_swept_at_payment_start() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[
            basket_open(),
            scan("735797", "Red Bull", 1.0, "EA", T0),
            rfid(RED_BULL_EPC, "Bagging", "ENTERED", T0 + 5),
        ],
    );
    assert!(!session.ledger.tail().unwrap().rfid_confirmed);

    apply_all(&mut session, &[pos("payment-start", json!({}))]);
    assert!(session.ledger.tail().unwrap().rfid_confirmed);
    // CV never saw the can, but no scale weight and no loose tags means nothing to report
    assert_eq!(session.notifier.count(), 0);
}

#[test]
fn test_bad_epc_is_skipped() {
    let mut session = create_test_session();
    apply_all(&mut session, &[basket_open()]);
    let err = session.process_reading(&rfid("not-an-epc", "Bagging", "ENTERED", T0)).unwrap_err();
    assert!(matches!(err, ProcessError::Decode { ref epc, .. } if epc == "not-an-epc"));
    assert!(session.rfid_tags.current().is_empty());
    assert_eq!(session.metrics.totals().epc_decode_failures, 1);
}

// ============================================================================
// Remove item
// ============================================================================

#[test]
fn test_remove_item_releases_associations() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[
            basket_open(),
            cv("Apple", "Scanner", "ENTERED", T0),
            scan(APPLE, "Apple", 1.0, "EA", T0 + 1),
            weight(10.5, T0 + 2),
        ],
    );
    assert_eq!(session.scale.suspect_count(), 0);
    assert!(session.cv_objects.current()[0].associated.is_some());

    apply_all(&mut session, &[remove(APPLE, 1.0)]);
    assert!(session.ledger.is_empty());
    assert!(session.cv_objects.current()[0].associated.is_none());
    assert_eq!(session.scale.suspect_count(), 1);
    assert!(!session.lifecycle.has_scanned());

    let err = session.process_reading(&pos("payment-start", json!({}))).unwrap_err();
    assert!(matches!(err, ProcessError::OutOfOrder(_)));
}

#[test]
fn test_partial_remove_trims_excess_cv() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[
            basket_open(),
            cv("Apple", "Scanner", "ENTERED", T0),
            scan(APPLE, "Apple", 1.0, "EA", T0 + 1),
            scan(APPLE, "Apple", 1.0, "EA", T0 + 2),
        ],
    );
    assert_eq!(session.ledger.len(), 1);
    assert_eq!(session.ledger.tail().unwrap().quantity, 2.0);

    apply_all(&mut session, &[remove(APPLE, 1.0)]);
    let tail = session.ledger.tail().unwrap();
    assert_eq!(tail.quantity, 1.0);
    assert_eq!(tail.cv_items.len(), 1);
    assert!(tail.cv_confirmed);
    assert!(session.lifecycle.has_scanned());
}

#[test]
fn test_remove_more_than_scanned_fails() {
    let mut session = create_test_session();
    apply_all(&mut session, &[basket_open(), scan(APPLE, "Apple", 1.0, "EA", T0)]);

    let err = session.process_reading(&remove(APPLE, 3.0)).unwrap_err();
    assert!(matches!(err, ProcessError::RemoveFailed(_)));
    assert!(session.ledger.is_empty());
    assert!(!session.lifecycle.has_scanned());
    assert_eq!(session.metrics.totals().remove_failures, 1);
}

// ============================================================================
// Basket boundaries
// ============================================================================

#[test]
fn test_first_basket_open_keeps_early_sightings() {
    let mut session = create_test_session();
    apply_all(&mut session, &[cv("Apple", "Entrance", "ENTERED", T0), basket_open()]);
    assert!(session.first_basket_open_complete);
    assert_eq!(session.cv_objects.current().len(), 1);
}

#[test]
fn test_basket_close_carries_unresolved_objects() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[
            basket_open(),
            cv("Apple", "Entrance", "ENTERED", T0),
            cv("Soda", "Bagging", "ENTERED", T0 + 1),
            scan("4011", "Bananas", 2.0, "lbs", T0 + 2),
            weight(2.0, T0 + 3),
            basket_close(),
        ],
    );
    // The entrance object left with the customer; the bagged one stays
    let names: Vec<&str> =
        session.cv_objects.current().iter().map(|o| o.identity.as_str()).collect();
    assert_eq!(names, vec!["Soda"]);
    assert!(session.ledger.is_empty());
    assert!(session.scale.is_empty());
    assert!(session.lifecycle.is_closed());
}

#[test]
fn test_basket_reset_is_idempotent() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[
            basket_open(),
            cv("Apple", "Scanner", "ENTERED", T0),
            cv("Soda", "Bagging", "ENTERED", T0 + 1),
            rfid(RED_BULL_EPC, "Bagging", "ENTERED", T0 + 2),
            scan(APPLE, "Apple", 1.0, "EA", T0 + 3),
            weight(10.5, T0 + 4),
            scan("735797", "Red Bull", 1.0, "EA", T0 + 5),
            weight(11.05, T0 + 6),
            weight(13.0, T0 + 7),
        ],
    );
    assert_eq!(session.ledger.len(), 2);
    assert_eq!(session.scale.suspect_count(), 1);
    assert!(session.rfid_tags.current()[0].associated.is_some());

    apply_all(&mut session, &[basket_close()]);
    let after_close = session.suspects();
    assert!(session.ledger.is_empty());
    assert!(session.scale.is_empty());
    assert!(session.scale.last_reading().is_none());
    assert!(session.rfid_tags.current().is_empty());
    let names: Vec<&str> =
        session.cv_objects.current().iter().map(|o| o.identity.as_str()).collect();
    assert_eq!(names, vec!["Soda"]);
    assert!(after_close.scale_suspect_list.is_empty());
    assert_eq!(after_close.cv_suspect_list.len(), 1);

    // Opening the next basket resets and carries over again with no change
    apply_all(&mut session, &[basket_open()]);
    assert!(session.ledger.is_empty());
    assert!(session.scale.is_empty());
    assert!(session.rfid_tags.current().is_empty());
    assert_eq!(session.cv_objects.current().len(), 1);
    assert_eq!(
        session.suspects().to_json_pretty().unwrap(),
        after_close.to_json_pretty().unwrap()
    );
}

#[test]
fn test_objects_after_payment_belong_to_next_basket() {
    let mut session = create_test_session();
    apply_all(
        &mut session,
        &[
            basket_open(),
            scan("4011", "Bananas", 2.0, "lbs", T0),
            weight(2.0, T0 + 1),
            pos("payment-start", json!({})),
            pos("payment-success", json!({})),
            cv("Chips", "Entrance", "ENTERED", T0 + 2),
        ],
    );
    assert!(session.after_payment_success);
    assert!(session.cv_objects.current().is_empty());
    assert_eq!(session.cv_objects.next_basket().len(), 1);

    apply_all(&mut session, &[basket_close()]);
    assert!(!session.after_payment_success);
    assert_eq!(session.cv_objects.current().len(), 1);
    assert_eq!(session.cv_objects.current()[0].identity, "Chips");
}

// ============================================================================
// State publication
// ============================================================================

#[test]
fn test_state_is_published_after_each_reading() {
    let mut session = create_test_session();
    apply_all(&mut session, &[basket_open(), scan(APPLE, "Apple", 1.0, "EA", T0)]);

    let state = session.state_handle().read().clone().unwrap();
    assert_eq!(state.event, "scanned-item");
    assert_eq!(state.positems.len(), 1);
    assert_eq!(state.positems[0].product_name, "Apple");

    let mut events = Vec::new();
    while let Ok(msg) = session.egress_rx.try_recv() {
        if let EgressMessage::State(payload) = msg {
            events.push(payload.state.event);
        }
    }
    assert_eq!(events, vec!["basket-open", "scanned-item"]);
}

#[test]
fn test_rejected_reading_publishes_nothing() {
    let mut session = create_test_session();
    let _ = session.process_reading(&scan(APPLE, "Apple", 1.0, "EA", T0));
    assert!(session.state_handle().read().is_none());
    assert!(session.egress_rx.try_recv().is_err());
    assert_eq!(session.metrics.readings_processed(), 0);
}

#[test]
fn test_state_lists_positive_scale_suspects() {
    let mut session = create_test_session();
    apply_all(&mut session, &[basket_open(), weight(4.0, 1), weight(6.0, 2), weight(5.0, 3)]);
    let state = session.state_snapshot(&EventKind::Weight);
    assert_eq!(state.scalesuspectitems.len(), 2);
    assert!((state.scaleitem.unwrap().delta + 1.0).abs() < 1e-6);
    assert_eq!(state.stats.scale_count, 2);
}

#[tokio::test]
async fn test_run_stops_when_channel_closes() {
    let mut session = create_test_session();
    let (tx, rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    tx.send(basket_open()).await.unwrap();
    tx.send(scan(APPLE, "Apple", 1.0, "EA", T0)).await.unwrap();
    tx.send(remove("123", 1.0)).await.unwrap();
    drop(tx);

    session.run(rx, shutdown_rx).await;
    assert_eq!(session.ledger.len(), 1);
    assert_eq!(session.metrics.readings_processed(), 3);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let mut session = create_test_session();
    let (_tx, rx) = mpsc::channel::<RawReading>(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(1), session.run(rx, shutdown_rx))
        .await
        .unwrap();
}
