//! Property tests: delivery invariants under arbitrary receiver behavior.

use courier_delivery::WebhookOptions;
use courier_testing::{
    invariants::Invariants, payloads, AttemptStatus, MockResponse, TenantId, TestEnv,
};
use proptest::prelude::*;

fn response_strategy() -> impl Strategy<Value = MockResponse> {
    prop_oneof![
        3 => Just(MockResponse::ok()),
        2 => prop::sample::select(vec![500u16, 502, 503, 504, 408, 429]).prop_map(MockResponse::failure),
        1 => prop::sample::select(vec![400u16, 401, 404, 410, 422]).prop_map(MockResponse::failure),
        1 => (1u64..120).prop_map(|seconds| MockResponse::RetryAfter { status: 503, seconds }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Whatever the receiver answers, every chain stays well formed, ends in
    /// a terminal attempt, and never exceeds its retry budget.
    #[test]
    fn chains_respect_budget_and_shape(
        responses in prop::collection::vec(response_strategy(), 1..12),
        max_retries in 0u32..5,
        events in 1usize..4,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let env = TestEnv::builder().failure_threshold(0).build().await.unwrap();
            let tenant = TenantId::new();
            env.mock_endpoint_sequence("/prop", responses).await;
            let webhook = env
                .register_webhook_with(
                    tenant,
                    "/prop",
                    &["order.paid"],
                    WebhookOptions { max_retries: Some(max_retries), ..Default::default() },
                )
                .await
                .unwrap();

            for n in 0..events {
                env.dispatch(tenant, "order.paid", payloads::order_paid(&format!("o{n}"), 1))
                    .await
                    .unwrap();
            }
            env.run_to_completion().await.unwrap();

            let attempts = env.attempts_for(webhook.id).await;
            prop_assert!(Invariants::check_all(&attempts).is_ok());
            prop_assert!(Invariants::retries_bounded(&attempts, max_retries).is_ok());
            prop_assert!(attempts.iter().all(|a| a.status.is_terminal()));

            let delivered = attempts.iter().filter(|a| a.status == AttemptStatus::Success).count();
            let exhausted = attempts.iter().filter(|a| a.exhausted).count();
            prop_assert_eq!(delivered + exhausted, events);
            prop_assert_eq!(env.received_on("/prop").await.len(), attempts.len());
            Ok(())
        })?;
    }
}
