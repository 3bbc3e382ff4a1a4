//! Delegated connects: a capability chain ending at another identity.

use crate::*;

use capone_core::cap::Rights;
use capone_core::client;
use capone_core::error::Error;
use capone_core::keys::SignKeyPair;

#[tokio::test]
async fn delegated_reference_admits_only_its_holder() {
    let host = start_host().await;
    let broker = SignKeyPair::generate();
    let requester = SignKeyPair::generate();

    // The broker requests a session on the requester's behalf...
    let mut channel = host.connect_test(&broker).await;
    let (identifier, broker_cap) = client::request_session(&mut channel, test_params(&["job"]))
        .await
        .unwrap();

    // ...and narrows it to EXEC for the requester.
    let requester_cap = broker_cap
        .delegate(Rights::EXEC, requester.public)
        .unwrap();

    // The broker presenting the requester's reference is refused: the chain
    // does not end at the broker.
    let mut channel = host.connect_test(&broker).await;
    let err = client::start_session(&mut channel, identifier, &requester_cap)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized), "got {err:?}");
    assert_eq!(host.registry.len(), 1, "refused connect must not consume");

    // The requester succeeds with it.
    let mut channel = host.connect_test(&requester).await;
    client::start_session(&mut channel, identifier, &requester_cap)
        .await
        .unwrap();
    assert!(host.registry.is_empty());

    // EXEC-only delegation cannot terminate: set up a fresh session to
    // prove the narrowed chain stops at TERM.
    let mut channel = host.connect_test(&broker).await;
    let (identifier, broker_cap) = client::request_session(&mut channel, test_params(&["job"]))
        .await
        .unwrap();
    let requester_cap = broker_cap
        .delegate(Rights::EXEC, requester.public)
        .unwrap();
    let mut channel = host.connect_test(&requester).await;
    let err = client::terminate(&mut channel, identifier, &requester_cap)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized), "got {err:?}");

    host.stop();
}
