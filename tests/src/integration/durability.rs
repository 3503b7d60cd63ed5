//! # Broker Restarts
//!
//! Durable queues survive a restart together with their persistent messages;
//! transient messages are lost.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use matrx_bus::{DeliveryMode, InMemoryBroker};
    use matrx_render_client::{CancelSignal, RenderClientError, ReplyWaiter};
    use matrx_types::{DeviceId, Topology};

    use crate::fixtures::{
        client, clock_request, provision, publish_reply, spawn_worker, AppIdRenderer,
    };

    #[tokio::test(start_paused = true)]
    async fn test_request_published_before_restart_is_served_after() {
        let broker = InMemoryBroker::new();

        let err = client(&broker)
            .render(
                clock_request("dev-1"),
                Some(Duration::from_secs(1)),
                CancelSignal::never(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RenderClientError::Timeout { .. }));
        let correlation_id = err.correlation_id().cloned().unwrap();

        broker.restart();
        assert!(broker.has_exchange("matrx"));
        assert!(broker.has_queue("matrx.dev-1"));
        assert_eq!(
            broker
                .queue_info("matrx.renderer_requests")
                .unwrap()
                .message_count,
            1
        );

        let worker = spawn_worker(&broker, AppIdRenderer);
        let mut waiter = ReplyWaiter::new(
            Arc::new(broker.channel()),
            &Topology::default(),
            DeviceId::new("dev-1").unwrap(),
        );
        let outcome = waiter
            .wait(
                Some(&correlation_id),
                Duration::from_secs(5),
                &mut CancelSignal::never(),
            )
            .await
            .unwrap();

        let reply = outcome.into_reply().unwrap();
        assert_eq!(reply.decode_output().unwrap(), b"clock");
        assert_eq!(reply.correlation_id, Some(correlation_id));
        assert_eq!(worker.stop().await.replied, 1);
    }

    #[tokio::test]
    async fn test_transient_reply_lost_on_restart() {
        let broker = InMemoryBroker::new();
        provision(&broker, "dev-1").await;
        publish_reply(
            &broker,
            "dev-1",
            None,
            r#"{"render_output":"QUJD"}"#,
            DeliveryMode::Transient,
        )
        .await;
        publish_reply(
            &broker,
            "dev-1",
            None,
            r#"{"render_output":"T0xE"}"#,
            DeliveryMode::Persistent,
        )
        .await;

        broker.restart();

        let queued = broker.queued_messages("matrx.dev-1");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].body, br#"{"render_output":"T0xE"}"#.to_vec());
    }
}
