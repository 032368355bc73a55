use std::sync::Arc;

use proptest::prelude::*;
use tabchat_core::SendOutcome;
use tabchat_core::test_utils::{Script, TestHarness};
use tokio::sync::Notify;

/// Every (session, gate) pair for 2 to 4 sessions, in a shuffled release
/// order.
fn release_order() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (2usize..=4).prop_flat_map(|sessions| {
        let gates: Vec<(usize, usize)> = (0..sessions)
            .flat_map(|session| [(session, 0), (session, 1)])
            .collect();
        (Just(sessions), Just(gates).prop_shuffle())
    })
}

async fn run_interleaved(sessions: usize, order: Vec<(usize, usize)>) {
    let h = TestHarness::new();
    let mut ids = Vec::new();
    let mut gates = Vec::new();
    let mut sends = Vec::new();

    for i in 0..sessions {
        let id = h.client.create_session(None, None).await;
        let pair = [Arc::new(Notify::new()), Arc::new(Notify::new())];
        h.transport.push_for(
            id,
            Script::new()
                .token(&format!("s{i}-a "))
                .wait(&pair[0])
                .token(&format!("s{i}-b "))
                .wait(&pair[1])
                .done(&format!("s{i}-c")),
        );
        sends.push(h.client.spawn_send(&format!("question {i}"), vec![]).unwrap());
        ids.push(id);
        gates.push(pair);
    }

    for (session, gate) in order {
        gates[session][gate].notify_one();
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        h.client.open_session(ids[session]).await.unwrap();
        let view = h.client.displayed();
        assert_eq!(view.session_id, Some(ids[session]));
        assert_eq!(view.messages, h.client.messages(ids[session]));
    }

    for (i, send) in sends.into_iter().enumerate() {
        let outcome = send.await.unwrap();
        assert!(
            matches!(outcome, SendOutcome::Completed { session_id, .. } if session_id == ids[i])
        );
    }

    for (i, id) in ids.iter().enumerate() {
        let messages = h.client.messages(*id);
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![format!("question {i}"), format!("s{i}-a s{i}-b s{i}-c")]
        );
        assert!(!messages[1].streaming);
        assert!(!h.client.is_streaming(*id));
    }
    assert!(!h.client.displayed().loading);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_interleaved_sessions_stay_isolated((sessions, order) in release_order()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_interleaved(sessions, order));
    }
}
