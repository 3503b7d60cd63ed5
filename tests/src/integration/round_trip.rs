//! # Request/Reply Round Trips
//!
//! The client publishes to `renderer_requests` and waits on `matrx.<device>`;
//! a renderer (simulated, or the real request consumer) answers keyed by the
//! device id.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use matrx_bus::{BrokerChannel, DeliveryMode, InMemoryBroker};
    use matrx_render_client::{
        CancelSignal, RenderClientError, ReplyWaiter, RequestPublisher, WaitOutcome, WaiterState,
    };
    use matrx_types::{CorrelationId, DeviceId, Topology};
    use tokio::time::Instant;

    use crate::fixtures::{
        client, clock_request, provision, publish_reply, spawn_worker, AppIdRenderer,
        BrokenRenderer,
    };

    // =========================================================================
    // SCENARIOS: SIMULATED RENDERER
    // =========================================================================

    /// dev-1 asks for the clock; the renderer answers "QUJD" on dev-1's queue.
    #[tokio::test(start_paused = true)]
    async fn test_clock_request_for_dev1_returns_qujd() {
        let broker = InMemoryBroker::new();
        let queue = provision(&broker, "dev-1").await;
        assert_eq!(queue.name, "matrx.dev-1");

        let mut waiter = ReplyWaiter::new(
            Arc::new(broker.channel()),
            &Topology::default(),
            DeviceId::new("dev-1").unwrap(),
        );
        waiter.subscribe().await.unwrap();

        let channel: Arc<dyn BrokerChannel> = Arc::new(broker.channel());
        let receipt = RequestPublisher::new(channel, Topology::default())
            .publish(&clock_request("dev-1"))
            .await
            .unwrap();

        let queued = broker.queued_messages("matrx.renderer_requests");
        assert_eq!(queued.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&queued[0].body).unwrap();
        assert_eq!(body["device"]["id"], "dev-1");
        assert_eq!(body["device"]["width"], 64);
        assert_eq!(body["device"]["height"], 32);
        assert_eq!(body["app_id"], "clock");
        assert_eq!(body["params"]["timezone"], "UTC");

        publish_reply(
            &broker,
            "dev-1",
            None,
            r#"{"render_output":"QUJD"}"#,
            DeliveryMode::Persistent,
        )
        .await;

        let outcome = waiter
            .wait(
                Some(&receipt.correlation_id),
                Duration::from_secs(5),
                &mut CancelSignal::never(),
            )
            .await
            .unwrap();
        let reply = outcome.into_reply().unwrap();
        assert_eq!(reply.render_output, "QUJD");
        assert_eq!(reply.decode_output().unwrap(), b"ABC");
        assert_eq!(waiter.state(), WaiterState::Matched);
        assert_eq!(broker.queue_info("matrx.dev-1").unwrap().message_count, 0);
    }

    /// Nobody answers within 5 seconds.
    #[tokio::test(start_paused = true)]
    async fn test_no_reply_within_five_seconds_times_out() {
        let broker = InMemoryBroker::new();
        let client = client(&broker);
        let started = Instant::now();

        let err = client
            .render(
                clock_request("dev-1"),
                Some(Duration::from_secs(5)),
                CancelSignal::never(),
            )
            .await
            .unwrap_err();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(5) + Duration::from_millis(10));
        match &err {
            RenderClientError::Timeout {
                device_id, timeout, ..
            } => {
                assert_eq!(device_id, "dev-1");
                assert_eq!(*timeout, Duration::from_secs(5));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_retryable());
        assert_eq!(broker.open_channel_count(), 0);
    }

    // =========================================================================
    // CLIENT ↔ REQUEST CONSUMER
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_client_and_worker_round_trip() {
        let broker = InMemoryBroker::new();
        let worker = spawn_worker(&broker, AppIdRenderer);
        let client = client(&broker);

        let round_trip = client
            .render(
                clock_request("dev-1"),
                Some(Duration::from_secs(5)),
                CancelSignal::never(),
            )
            .await
            .unwrap();

        let reply = round_trip.outcome.reply().unwrap();
        assert_eq!(reply.decode_output().unwrap(), b"clock");
        assert_eq!(reply.render_output, "Y2xvY2s=");
        assert_eq!(
            reply.correlation_id.as_ref(),
            Some(&round_trip.receipt.correlation_id)
        );
        assert_eq!(reply.device_id.as_deref(), Some("dev-1"));
        assert_eq!(reply.app_id.as_deref(), Some("clock"));
        assert!(reply.processed_at.is_some());

        let stats = worker.stop().await;
        assert_eq!(stats.received, 1);
        assert_eq!(stats.replied, 1);
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_failure_is_delivered_as_reply() {
        let broker = InMemoryBroker::new();
        let worker = spawn_worker(&broker, BrokenRenderer);

        let round_trip = client(&broker)
            .render(
                clock_request("dev-1"),
                Some(Duration::from_secs(5)),
                CancelSignal::never(),
            )
            .await
            .unwrap();

        let reply = round_trip.outcome.into_reply().unwrap();
        assert!(reply.is_failure());
        assert!(reply.error.as_deref().unwrap().contains("font missing"));

        let stats = worker.stop().await;
        assert_eq!(stats.failed_renders, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_requests_get_distinct_correlation_ids() {
        let broker = InMemoryBroker::new();
        let worker = spawn_worker(&broker, AppIdRenderer);
        let client = client(&broker);

        let mut seen: Vec<CorrelationId> = Vec::new();
        for app in ["clock", "weather", "clock"] {
            let mut request = clock_request("dev-1");
            request.app_id = app.to_string();
            let round_trip = client
                .render(request, Some(Duration::from_secs(5)), CancelSignal::never())
                .await
                .unwrap();
            assert_eq!(
                round_trip.outcome.reply().unwrap().decode_output().unwrap(),
                app.as_bytes()
            );
            assert!(!seen.contains(&round_trip.receipt.correlation_id));
            seen.push(round_trip.receipt.correlation_id);
        }

        assert_eq!(worker.stop().await.replied, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_wait_returns_cleanly() {
        let broker = InMemoryBroker::new();
        let client = Arc::new(client(&broker));
        let (handle, signal) = matrx_render_client::cancellation();

        let task = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .render(clock_request("dev-1"), Some(Duration::from_secs(30)), signal)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();

        let round_trip = task.await.unwrap().unwrap();
        assert_eq!(round_trip.outcome, WaitOutcome::Cancelled);
        assert_eq!(broker.open_channel_count(), 0);
        // The request is still there for a renderer.
        assert_eq!(
            broker
                .queue_info("matrx.renderer_requests")
                .unwrap()
                .message_count,
            1
        );
    }
}
