//! # Device Isolation and Correlation
//!
//! A reply keyed `D` lands only in `matrx.D`, and a waiter only accepts the
//! reply to its own request.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use matrx_bus::{Binding, DeliveryMode, InMemoryBroker};
    use matrx_render_client::{
        CancelSignal, ClientConfig, RenderClientError, ReplyMatching, ReplyWaiter,
        StaleReplyPolicy,
    };
    use matrx_types::{DeviceId, Topology};

    use crate::fixtures::{
        client_with, clock_request, provision, publish_reply, spawn_worker, AppIdRenderer,
    };

    fn waiter(broker: &InMemoryBroker, device: &str) -> ReplyWaiter {
        ReplyWaiter::new(
            Arc::new(broker.channel()),
            &Topology::default(),
            DeviceId::new(device).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_reaches_only_its_device() {
        let broker = InMemoryBroker::new();
        provision(&broker, "dev-1").await;
        provision(&broker, "dev-2").await;
        publish_reply(
            &broker,
            "dev-2",
            None,
            r#"{"render_output":"QUJD"}"#,
            DeliveryMode::Persistent,
        )
        .await;

        let err = waiter(&broker, "dev-1")
            .wait(None, Duration::from_secs(1), &mut CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, RenderClientError::Timeout { .. }));
        assert_eq!(broker.queue_info("matrx.dev-1").unwrap().message_count, 0);
        assert_eq!(broker.queue_info("matrx.dev-2").unwrap().message_count, 1);

        let outcome = waiter(&broker, "dev-2")
            .wait(None, Duration::from_secs(1), &mut CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(outcome.reply().unwrap().render_output, "QUJD");
    }

    #[tokio::test]
    async fn test_provisioning_twice_keeps_one_binding() {
        let broker = InMemoryBroker::new();
        let first = provision(&broker, "dev-1").await;
        let second = provision(&broker, "dev-1").await;
        assert_eq!(first.name, second.name);

        let reply_bindings: Vec<Binding> = broker
            .bindings()
            .into_iter()
            .filter(|b| b.queue == "matrx.dev-1")
            .collect();
        assert_eq!(reply_bindings, vec![Binding::new("matrx.dev-1", "matrx", "dev-1")]);
    }

    #[test]
    fn test_wildcard_device_id_cannot_be_bound() {
        assert!(DeviceId::new("dev-*").is_err());
        assert!(DeviceId::new("#").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_for_one_device_get_their_own_replies() {
        let broker = InMemoryBroker::new();
        let worker = spawn_worker(&broker, AppIdRenderer);
        let config = ClientConfig {
            matching: ReplyMatching::Strict,
            ..ClientConfig::default()
        };
        let clock = client_with(&broker, config.clone());
        let weather = client_with(&broker, config);

        let mut weather_request = clock_request("dev-1");
        weather_request.app_id = "weather".to_string();
        let timeout = Some(Duration::from_secs(5));

        let (a, b) = tokio::join!(
            clock.render(clock_request("dev-1"), timeout, CancelSignal::never()),
            weather.render(weather_request, timeout, CancelSignal::never()),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let a_reply = a.outcome.into_reply().unwrap();
        let b_reply = b.outcome.into_reply().unwrap();
        assert_eq!(a_reply.decode_output().unwrap(), b"clock");
        assert_eq!(b_reply.decode_output().unwrap(), b"weather");
        assert_eq!(a_reply.correlation_id, Some(a.receipt.correlation_id));
        assert_eq!(b_reply.correlation_id, Some(b.receipt.correlation_id));

        assert_eq!(worker.stop().await.replied, 2);
        assert_eq!(broker.queue_info("matrx.dev-1").unwrap().message_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_client_discards_uncorrelated_leftover() {
        let broker = InMemoryBroker::new();
        provision(&broker, "dev-1").await;
        // Answer to some earlier request that never carried an id.
        publish_reply(
            &broker,
            "dev-1",
            None,
            r#"{"render_output":"T0xE"}"#,
            DeliveryMode::Persistent,
        )
        .await;
        let worker = spawn_worker(&broker, AppIdRenderer);

        let config = ClientConfig {
            matching: ReplyMatching::Strict,
            stale_policy: StaleReplyPolicy::Discard,
            ..ClientConfig::default()
        };
        let round_trip = client_with(&broker, config)
            .render(
                clock_request("dev-1"),
                Some(Duration::from_secs(5)),
                CancelSignal::never(),
            )
            .await
            .unwrap();

        assert_eq!(
            round_trip.outcome.reply().unwrap().decode_output().unwrap(),
            b"clock"
        );
        assert_eq!(broker.queue_info("matrx.dev-1").unwrap().message_count, 0);
        worker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lenient_client_accepts_uncorrelated_reply() {
        let broker = InMemoryBroker::new();
        provision(&broker, "dev-1").await;
        publish_reply(
            &broker,
            "dev-1",
            None,
            r#"{"render_output":"QUJD"}"#,
            DeliveryMode::Persistent,
        )
        .await;

        let round_trip = client_with(&broker, ClientConfig::default())
            .render(
                clock_request("dev-1"),
                Some(Duration::from_secs(5)),
                CancelSignal::never(),
            )
            .await
            .unwrap();
        assert_eq!(round_trip.outcome.reply().unwrap().render_output, "QUJD");
    }
}
