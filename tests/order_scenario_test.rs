//! End-to-end restaurant orders: receiver loop, consume pipe, fork-join
//! execution and correlated replies.

mod common;

use common::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use relay_core::dispatch::{
    ConsumePipe, DispatchError, InboundDelivery, MessageReceiver, PipelineError,
};
use relay_core::config::ForkJoinConfig;
use relay_core::messaging::{InMemoryEndpoint, InMemoryTransportLock, ReceivedMessage};

fn order(fries: &[&str], burgers: &[(f64, bool)], shakes: &[&str]) -> SubmitOrder {
    SubmitOrder {
        order_id: Uuid::new_v4(),
        fries: fries.iter().map(|size| Fry::new(size)).collect(),
        burgers: burgers
            .iter()
            .map(|(weight, cheese)| Burger::new(*weight, *cheese))
            .collect(),
        shakes: shakes.iter().map(|flavor| Shake::new(flavor)).collect(),
    }
}

fn delivery(order: &SubmitOrder) -> (InboundDelivery, Arc<InMemoryTransportLock>, Uuid) {
    let correlation_id = Uuid::new_v4();
    let message = ReceivedMessage::from_body("submit_order", order)
        .unwrap()
        .with_correlation_id(correlation_id)
        .with_response_address("order-replies");
    let lock = Arc::new(InMemoryTransportLock::new(message.message_id.to_string()));
    (
        InboundDelivery::new(message).with_lock(lock.clone()),
        lock,
        correlation_id,
    )
}

#[tokio::test]
async fn test_three_orders_complete_with_correlated_replies() {
    let factory = kitchen_factory(Duration::from_millis(0));
    let (endpoint, mut replies) = InMemoryEndpoint::new();
    let pipe = ConsumePipe::new().with_send_endpoint(Arc::new(endpoint));
    pipe.register(
        "submit_order",
        Arc::new(OrderConsumer::new(&factory, Some(Duration::from_secs(5)))),
    )
    .unwrap();
    let receiver = Arc::new(MessageReceiver::new(
        "orders",
        Arc::new(pipe),
        &quiet_config(),
    ));

    let orders = vec![
        order(&["large"], &[(0.5, true)], &["chocolate"]),
        order(&["small", "medium"], &[], &["vanilla", "banana"]),
        order(&[], &[(0.3, false)], &[]),
    ];

    let (deliveries, inbox) = mpsc::channel(8);
    let running = tokio::spawn(Arc::clone(&receiver).run(inbox));

    let mut expected = HashMap::new();
    let mut locks = Vec::new();
    for order in &orders {
        let (delivery, lock, correlation_id) = delivery(order);
        expected.insert(order.order_id, (correlation_id, order));
        locks.push(lock);
        deliveries.send(delivery).await.unwrap();
    }
    drop(deliveries);
    running.await.unwrap().unwrap();

    let mut completed = HashMap::new();
    while let Ok(reply) = replies.try_recv() {
        assert_eq!(reply.message_type, "order_completed");
        assert_eq!(reply.destination, "order-replies");
        let body: OrderCompleted = reply.deserialize_body().unwrap();
        completed.insert(body.order_id, (reply.correlation_id, body));
    }
    assert_eq!(completed.len(), 3);

    for (order_id, (correlation_id, order)) in &expected {
        let (reply_correlation, body) = &completed[order_id];
        assert_eq!(reply_correlation, &Some(*correlation_id));

        let line_count = order.fries.len() + order.burgers.len() + order.shakes.len();
        assert_eq!(body.lines.len(), line_count);
        for fry in &order.fries {
            assert!(body
                .lines
                .contains(&(fry.fry_id, format!("{} fries", fry.size))));
        }
        for shake in &order.shakes {
            assert!(body
                .lines
                .contains(&(shake.shake_id, format!("{} shake", shake.flavor))));
        }
    }

    assert!(locks.iter().all(|lock| lock.complete_calls() == 1));
    assert_eq!(receiver.metrics().faulted_count, 0);
    assert_eq!(receiver.active_dispatch_count(), 0);
}

#[tokio::test]
async fn test_failed_line_abandons_order_without_reply() {
    let factory = kitchen_factory(Duration::from_millis(0));
    let (endpoint, mut replies) = InMemoryEndpoint::new();
    let pipe = ConsumePipe::new().with_send_endpoint(Arc::new(endpoint));
    pipe.register("submit_order", Arc::new(OrderConsumer::new(&factory, None)))
        .unwrap();
    let receiver = MessageReceiver::new("orders", Arc::new(pipe), &quiet_config());

    let burnt = order(&["burnt", "small"], &[], &["vanilla"]);
    let (delivery, lock, _) = delivery(&burnt);
    let InboundDelivery { message, .. } = delivery;

    let err = receiver
        .handle(message, None, Some(lock.clone()))
        .await
        .unwrap_err();

    assert!(!err.is_lock_lost());
    assert_eq!(lock.abandon_calls(), 1);
    assert_eq!(lock.complete_calls(), 0);
    assert!(replies.try_recv().is_err());
    assert_eq!(receiver.metrics().faulted_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_line_times_out_the_order() {
    let factory = kitchen_factory(Duration::from_secs(30));
    let (endpoint, mut replies) = InMemoryEndpoint::new();
    let pipe = ConsumePipe::new().with_send_endpoint(Arc::new(endpoint));
    pipe.register(
        "submit_order",
        Arc::new(OrderConsumer::new(&factory, Some(Duration::from_secs(2)))),
    )
    .unwrap();
    let receiver = MessageReceiver::new("orders", Arc::new(pipe), &quiet_config());

    let slow = order(&["small"], &[], &["slow"]);
    let (delivery, lock, _) = delivery(&slow);

    let err = receiver
        .handle(delivery.message, None, Some(lock.clone()))
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        DispatchError::Faulted {
            source: PipelineError::Aggregate(fault),
            ..
        } if fault.is_timed_out()
    ));
    assert_eq!(lock.abandon_calls(), 1);
    assert!(replies.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_configured_time_to_live_applies_to_consumer_plans() {
    let factory = kitchen_factory(Duration::from_secs(30));
    let (endpoint, mut replies) = InMemoryEndpoint::new();
    let pipe = ConsumePipe::new()
        .with_send_endpoint(Arc::new(endpoint))
        .with_fork_join_config(ForkJoinConfig {
            default_time_to_live_ms: Some(1_000),
            record_late_results: true,
        });
    pipe.register("submit_order", Arc::new(OrderConsumer::new(&factory, None)))
        .unwrap();
    let receiver = MessageReceiver::new("orders", Arc::new(pipe), &quiet_config());

    let slow = order(&[], &[], &["slow"]);
    let (delivery, lock, _) = delivery(&slow);

    let err = receiver
        .handle(delivery.message, None, Some(lock.clone()))
        .await
        .unwrap_err();

    match &err {
        DispatchError::Faulted {
            source: PipelineError::Aggregate(fault),
            ..
        } => assert!(fault.is_timed_out()),
        other => panic!("expected aggregate timeout, got {other:?}"),
    }
    assert_eq!(lock.abandon_calls(), 1);
    assert!(replies.try_recv().is_err());
}
