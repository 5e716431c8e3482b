//! End-to-end messaging between in-memory peers.

mod common;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Duration;

use hv_core::{CoreError, MemoryHub, MessageEvent, SendRequest, Transport, TransportError};
use hv_crypto::{derive_shared_secret, CryptoError};
use hv_proto::EncryptedMessage;

use common::{befriend, deliver, peer};

#[tokio::test]
async fn message_roundtrip_between_peers() {
    let hub = MemoryHub::new();
    let alice = peer(&hub).await;
    let bob = peer(&hub).await;
    let (bob_in_alice, alice_in_bob) = befriend(&alice, &bob).await;

    let sent = alice
        .session
        .messages()
        .send_message(SendRequest::text(&bob_in_alice.id, "hello bob"))
        .await
        .unwrap();
    assert!(sent.is_sent);

    assert_eq!(deliver(&bob).await, 1);
    let history = bob.session.messages().get_messages(&alice_in_bob.id).await.unwrap();
    assert_eq!(history.len(), 1);
    let received = &history[0];
    assert_eq!(received.id, sent.id);
    assert_eq!(received.content, "hello bob");
    assert!(received.is_delivered);
    assert!(!received.is_read);
    assert_eq!(received.sender_id, sent.sender_id);
    assert_eq!(bob.session.messages().get_unread_count(None).await.unwrap(), 1);

    assert!(bob.session.messages().mark_as_read(&received.id).await.unwrap());
    assert_eq!(bob.session.messages().get_unread_count(None).await.unwrap(), 0);

    let outbox = alice.session.messages().get_messages(&bob_in_alice.id).await.unwrap();
    assert_eq!(outbox, vec![sent]);
}

#[tokio::test]
async fn tampered_tag_is_rejected_and_nothing_stored() {
    let hub = MemoryHub::new();
    let alice = peer(&hub).await;
    let bob = peer(&hub).await;
    let (bob_in_alice, alice_in_bob) = befriend(&alice, &bob).await;

    alice
        .session
        .messages()
        .send_message(SendRequest::text(&bob_in_alice.id, "secret"))
        .await
        .unwrap();
    let payload = bob.transport.poll_inbound().await.unwrap().remove(0);

    let mut wire = EncryptedMessage::from_bytes(&payload).unwrap();
    let mut tag = URL_SAFE_NO_PAD.decode(&wire.tag).unwrap();
    tag[0] ^= 0x01;
    wire.tag = URL_SAFE_NO_PAD.encode(tag);
    let tampered = wire.to_bytes().unwrap();

    let bob_identity = bob.session.identity().current().unwrap();
    let shared = derive_shared_secret(&bob_identity, &alice_in_bob.public_key).unwrap();
    let err = bob
        .session
        .messages()
        .receive_message(&alice_in_bob.id, &tampered, &shared)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Crypto(CryptoError::AuthenticationFailed)));

    // the poll path swallows the same failure
    assert!(bob.session.messages().ingest(&tampered).await.unwrap().is_none());
    assert!(bob.session.messages().get_messages(&alice_in_bob.id).await.unwrap().is_empty());

    // the untouched payload still verifies
    let ok = bob
        .session
        .messages()
        .receive_message(&alice_in_bob.id, &payload, &shared)
        .await
        .unwrap();
    assert_eq!(ok.content, "secret");
}

#[tokio::test]
async fn tampered_header_fails_authentication() {
    let hub = MemoryHub::new();
    let alice = peer(&hub).await;
    let bob = peer(&hub).await;
    let (bob_in_alice, _) = befriend(&alice, &bob).await;

    alice
        .session
        .messages()
        .send_message(SendRequest::text(&bob_in_alice.id, "on time"))
        .await
        .unwrap();
    let payload = bob.transport.poll_inbound().await.unwrap().remove(0);
    let mut wire = EncryptedMessage::from_bytes(&payload).unwrap();
    wire.timestamp = wire.timestamp - Duration::hours(1);

    assert!(bob
        .session
        .messages()
        .ingest(&wire.to_bytes().unwrap())
        .await
        .unwrap()
        .is_none());
    assert_eq!(bob.session.messages().get_unread_count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn sender_must_match_contact() {
    let hub = MemoryHub::new();
    let alice = peer(&hub).await;
    let bob = peer(&hub).await;
    let carol = peer(&hub).await;
    let (_, alice_in_bob) = befriend(&alice, &bob).await;
    let (bob_in_carol, carol_in_bob) = befriend(&carol, &bob).await;

    carol
        .session
        .messages()
        .send_message(SendRequest::text(&bob_in_carol.id, "from carol"))
        .await
        .unwrap();
    let payload = bob.transport.poll_inbound().await.unwrap().remove(0);

    let bob_identity = bob.session.identity().current().unwrap();
    let carol_shared = derive_shared_secret(&bob_identity, &carol_in_bob.public_key).unwrap();
    let err = bob
        .session
        .messages()
        .receive_message(&alice_in_bob.id, &payload, &carol_shared)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert!(bob.session.messages().get_messages(&alice_in_bob.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_sender_is_dropped() {
    let hub = MemoryHub::new();
    let bob = peer(&hub).await;
    let mallory = peer(&hub).await;

    // mallory knows bob, bob never added mallory
    let ex_bob = bob.session.contacts().create_exchange("Bob").await.unwrap();
    let bob_in_mallory = mallory.session.contacts().add_from_exchange(&ex_bob).await.unwrap();
    mallory
        .session
        .messages()
        .send_message(SendRequest::text(&bob_in_mallory.id, "hi"))
        .await
        .unwrap();

    assert_eq!(deliver(&bob).await, 0);
    assert!(bob.session.contacts().list().await.unwrap().is_empty());
    assert_eq!(bob.session.messages().get_unread_count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn garbage_payloads_are_swallowed() {
    let hub = MemoryHub::new();
    let bob = peer(&hub).await;
    assert!(bob.session.messages().ingest(b"not json").await.unwrap().is_none());
    assert!(bob.session.messages().ingest(&vec![b'{'; 200 * 1024]).await.unwrap().is_none());
}

#[tokio::test]
async fn retry_exhaustion_persists_unsent_row() {
    let hub = MemoryHub::new();
    let alice = peer(&hub).await;
    let bob = peer(&hub).await;
    let (bob_in_alice, _) = befriend(&alice, &bob).await;

    alice.transport.fail_next_sends(vec![
        TransportError::Transient("timeout".into()),
        TransportError::Transient("timeout".into()),
        TransportError::Transient("timeout".into()),
    ]);

    let err = alice
        .session
        .messages()
        .send_message(SendRequest::text(&bob_in_alice.id, "lost"))
        .await
        .unwrap_err();

    let CoreError::SendFailed { message, source } = err else {
        panic!("expected SendFailed, got {err:?}");
    };
    assert!(source.is_transient());
    assert!(!message.is_sent);
    assert_eq!(alice.transport.send_calls(), 3);

    let stored = alice.session.messages().get_messages(&bob_in_alice.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, message.id);
    assert!(!stored[0].is_sent);
}

#[tokio::test]
async fn permanent_error_stops_immediately() {
    let hub = MemoryHub::new();
    let alice = peer(&hub).await;
    let bob = peer(&hub).await;
    let (bob_in_alice, _) = befriend(&alice, &bob).await;

    alice
        .transport
        .fail_next_sends(vec![TransportError::Permanent("route gone".into())]);

    let err = alice
        .session
        .messages()
        .send_message(SendRequest::text(&bob_in_alice.id, "x"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::SendFailed { source: TransportError::Permanent(_), .. }
    ));
    assert_eq!(alice.transport.send_calls(), 1);
}

#[tokio::test]
async fn transient_failure_then_success() {
    let hub = MemoryHub::new();
    let alice = peer(&hub).await;
    let bob = peer(&hub).await;
    let (bob_in_alice, _) = befriend(&alice, &bob).await;

    alice
        .transport
        .fail_next_sends(vec![TransportError::Transient("blip".into())]);
    let sent = alice
        .session
        .messages()
        .send_message(SendRequest::text(&bob_in_alice.id, "eventually"))
        .await
        .unwrap();
    assert!(sent.is_sent);
    assert_eq!(alice.transport.send_calls(), 2);
    assert_eq!(deliver(&bob).await, 1);
}

#[tokio::test]
async fn send_validation() {
    let hub = MemoryHub::new();
    let alice = peer(&hub).await;
    let bob = peer(&hub).await;
    let (bob_in_alice, _) = befriend(&alice, &bob).await;
    let engine = alice.session.messages();

    let too_big = "x".repeat(hv_proto::MAX_CONTENT_BYTES + 1);
    assert!(matches!(
        engine.send_message(SendRequest::text(&bob_in_alice.id, too_big)).await,
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        engine
            .send_message(SendRequest::text(&bob_in_alice.id, "x").ephemeral(0))
            .await,
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        engine.send_message(SendRequest::text("nobody", "x")).await,
        Err(CoreError::Validation(_))
    ));
    assert_eq!(alice.transport.send_calls(), 0);
}

#[tokio::test]
async fn ephemeral_message_expires_on_schedule() {
    let hub = MemoryHub::new();
    let alice = peer(&hub).await;
    let bob = peer(&hub).await;
    let (bob_in_alice, alice_in_bob) = befriend(&alice, &bob).await;
    let mut events = bob.session.messages().subscribe();

    alice
        .session
        .messages()
        .send_message(SendRequest::text(&bob_in_alice.id, "burn after reading").ephemeral(60))
        .await
        .unwrap();
    deliver(&bob).await;

    let received = match events.recv().await.unwrap() {
        MessageEvent::Received(m) => m,
        other => panic!("unexpected event {other:?}"),
    };
    assert!(received.is_ephemeral);
    assert_eq!(received.ephemeral_duration_seconds, Some(60));

    let engine = bob.session.messages();
    let before = received.created_at + Duration::seconds(59);
    assert_eq!(engine.cleanup_expired_at(before).await.unwrap(), 0);
    assert_eq!(engine.get_messages(&alice_in_bob.id).await.unwrap().len(), 1);

    let at = received.created_at + Duration::seconds(60);
    assert_eq!(engine.cleanup_expired_at(at).await.unwrap(), 1);
    assert!(engine.get_messages(&alice_in_bob.id).await.unwrap().is_empty());

    match events.recv().await.unwrap() {
        MessageEvent::Expired { ids } => assert_eq!(ids, vec![received.id]),
        other => panic!("unexpected event {other:?}"),
    }

    // sender's copy follows the same clock
    let at_sender = chrono::Utc::now() + Duration::seconds(61);
    assert_eq!(alice.session.messages().cleanup_expired_at(at_sender).await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_delivery_is_idempotent() {
    let hub = MemoryHub::new();
    let alice = peer(&hub).await;
    let bob = peer(&hub).await;
    let (bob_in_alice, alice_in_bob) = befriend(&alice, &bob).await;

    alice
        .session
        .messages()
        .send_message(SendRequest::text(&bob_in_alice.id, "once"))
        .await
        .unwrap();
    let payload = bob.transport.poll_inbound().await.unwrap().remove(0);

    let first = bob.session.messages().ingest(&payload).await.unwrap().unwrap();
    let second = bob.session.messages().ingest(&payload).await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(bob.session.messages().get_messages(&alice_in_bob.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn bulk_read_and_delete() {
    let hub = MemoryHub::new();
    let alice = peer(&hub).await;
    let bob = peer(&hub).await;
    let (bob_in_alice, alice_in_bob) = befriend(&alice, &bob).await;

    for text in ["one", "two", "three"] {
        alice
            .session
            .messages()
            .send_message(SendRequest::text(&bob_in_alice.id, text))
            .await
            .unwrap();
    }
    assert_eq!(deliver(&bob).await, 3);

    let engine = bob.session.messages();
    assert_eq!(engine.get_unread_count(Some(&alice_in_bob.id)).await.unwrap(), 3);
    assert_eq!(engine.mark_all_as_read(Some(&alice_in_bob.id)).await.unwrap(), 3);
    assert_eq!(engine.get_unread_count(None).await.unwrap(), 0);

    let first = engine.get_messages(&alice_in_bob.id).await.unwrap().remove(0);
    assert!(engine.delete_message(&first.id).await.unwrap());
    assert!(!engine.delete_message(&first.id).await.unwrap());
    assert_eq!(engine.delete_all_messages(Some(&alice_in_bob.id)).await.unwrap(), 2);
    assert!(engine.get_messages(&alice_in_bob.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn replayed_payload_stays_gone_after_expiry_and_delete() {
    let hub = MemoryHub::new();
    let alice = peer(&hub).await;
    let bob = peer(&hub).await;
    let (bob_in_alice, alice_in_bob) = befriend(&alice, &bob).await;

    for request in [
        SendRequest::text(&bob_in_alice.id, "self destruct").ephemeral(30),
        SendRequest::text(&bob_in_alice.id, "delete me"),
    ] {
        alice.session.messages().send_message(request).await.unwrap();
    }
    let mut payloads = bob.transport.poll_inbound().await.unwrap();
    assert_eq!(payloads.len(), 2);
    let deleted_payload = payloads.pop().unwrap();
    let expired_payload = payloads.pop().unwrap();
    let engine = bob.session.messages();

    let ephemeral = engine.ingest(&expired_payload).await.unwrap().unwrap();
    let at = ephemeral.created_at + Duration::seconds(30);
    assert_eq!(engine.cleanup_expired_at(at).await.unwrap(), 1);
    assert!(engine.ingest(&expired_payload).await.unwrap().is_none());
    assert!(engine.get_messages(&alice_in_bob.id).await.unwrap().is_empty());

    let plain = engine.ingest(&deleted_payload).await.unwrap().unwrap();
    assert!(engine.delete_message(&plain.id).await.unwrap());
    assert!(engine.ingest(&deleted_payload).await.unwrap().is_none());
    assert!(engine.get_messages(&alice_in_bob.id).await.unwrap().is_empty());
    assert_eq!(engine.get_unread_count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn escape_heavy_content_at_the_cap_is_delivered() {
    let hub = MemoryHub::new();
    let alice = peer(&hub).await;
    let bob = peer(&hub).await;
    let (bob_in_alice, alice_in_bob) = befriend(&alice, &bob).await;

    let content = "\n".repeat(hv_proto::MAX_CONTENT_BYTES);
    alice
        .session
        .messages()
        .send_message(SendRequest::text(&bob_in_alice.id, content.clone()))
        .await
        .unwrap();
    assert_eq!(deliver(&bob).await, 1);

    let history = bob.session.messages().get_messages(&alice_in_bob.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, content);
}
