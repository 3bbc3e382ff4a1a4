//! Session lifecycle scenarios: request, connect, terminate.

use crate::*;

use capone_core::cap::{Capability, Rights};
use capone_core::client;
use capone_core::error::Error;
use capone_core::keys::SignKeyPair;
use capone_core::proto::MAX_MESSAGE_LEN;

#[tokio::test]
async fn request_then_connect_runs_the_plugin() {
    let host = start_host().await;
    let keys = SignKeyPair::generate();
    let params = test_params(&["parameter-data"]);

    // Request: a session appears, and the returned capability is delegated
    // to us with EXEC and TERM.
    let mut channel = host.connect_test(&keys).await;
    let (identifier, cap) = client::request_session(&mut channel, params.clone())
        .await
        .unwrap();
    assert_eq!(host.registry.len(), 1);
    assert_eq!(cap.chain().len(), 1);
    assert_eq!(cap.tail_identity(), Some(&keys.public));
    assert_eq!(cap.tail_rights(), Rights::EXEC | Rights::TERM);

    // Connect: the session is consumed and the plugin serves us.
    let mut channel = host.connect_test(&keys).await;
    client::start_session(&mut channel, identifier, &cap)
        .await
        .unwrap();

    // The test plugin echoes the parameters once it has recorded them.
    let echoed = channel.read_bytes(MAX_MESSAGE_LEN).await.unwrap();
    assert_eq!(echoed, params);

    let served = host.test_plugin.served();
    assert_eq!(served.len(), 1);
    assert_eq!(served[0].invoker, keys.public);
    assert_eq!(served[0].args, vec!["parameter-data".to_string()]);
    assert!(host.registry.is_empty());

    host.stop();
}

#[tokio::test]
async fn connect_without_a_session_fails() {
    let host = start_host().await;
    let keys = SignKeyPair::generate();

    let mut channel = host.connect_test(&keys).await;
    let err = client::start_session(&mut channel, 1, &Capability::root())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound), "got {err:?}");
    assert!(host.registry.is_empty());

    host.stop();
}

#[tokio::test]
async fn connect_cannot_reuse_a_consumed_session() {
    let host = start_host().await;
    let keys = SignKeyPair::generate();

    let mut channel = host.connect_test(&keys).await;
    let (identifier, cap) = client::request_session(&mut channel, test_params(&["x"]))
        .await
        .unwrap();

    let mut channel = host.connect_test(&keys).await;
    client::start_session(&mut channel, identifier, &cap)
        .await
        .unwrap();

    // The first successful Connect removed the session.
    let mut channel = host.connect_test(&keys).await;
    let err = client::start_session(&mut channel, identifier, &cap)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound), "got {err:?}");

    host.stop();
}

#[tokio::test]
async fn termination_by_creator_is_idempotent() {
    let host = start_host().await;
    let keys = SignKeyPair::generate();

    // Unit-test scaffolding: add the session directly and derive a TERM
    // reference.
    let session = host.registry.add(test_params(&["x"]), keys.public);
    let cap = session.cap.delegate(Rights::TERM, keys.public).unwrap();

    let mut channel = host.connect_test(&keys).await;
    client::terminate(&mut channel, session.identifier, &cap)
        .await
        .unwrap();
    assert!(host.registry.is_empty());

    // Terminating again acks success and changes nothing.
    let mut channel = host.connect_test(&keys).await;
    client::terminate(&mut channel, session.identifier, &cap)
        .await
        .unwrap();
    assert!(host.registry.is_empty());

    host.stop();
}

#[tokio::test]
async fn terminate_needs_the_term_right() {
    let host = start_host().await;
    let keys = SignKeyPair::generate();

    let session = host.registry.add(test_params(&["x"]), keys.public);
    let exec_only = session.cap.delegate(Rights::EXEC, keys.public).unwrap();

    let mut channel = host.connect_test(&keys).await;
    let err = client::terminate(&mut channel, session.identifier, &exec_only)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized), "got {err:?}");
    assert_eq!(host.registry.len(), 1, "session must survive a denied terminate");

    host.stop();
}

#[tokio::test]
async fn request_is_denied_without_acl_entry() {
    let allowed = SignKeyPair::generate();
    let outsider = SignKeyPair::generate();
    let host = start_host_with_acls("[\"*\"]", &format!("[\"{}\"]", allowed.public.hex())).await;

    let mut channel = host.connect_test(&outsider).await;
    let err = client::request_session(&mut channel, test_params(&["x"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized), "got {err:?}");
    assert!(host.registry.is_empty());

    host.stop();
}
