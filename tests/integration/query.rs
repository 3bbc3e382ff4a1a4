//! Query scenarios: service descriptions and the query ACL.

use crate::*;

use capone_core::client;
use capone_core::error::Error;
use capone_core::keys::SignKeyPair;

#[tokio::test]
async fn query_returns_the_service_description() {
    let host = start_host().await;
    let keys = SignKeyPair::generate();

    let mut channel = host.connect_test(&keys).await;
    let description = client::query(&mut channel).await.unwrap();

    assert_eq!(description.name, "Foo");
    assert_eq!(description.category, "Test");
    assert_eq!(description.kind, "test");
    assert_eq!(description.version, "0.0.1");
    assert_eq!(description.location, "Dunno");
    assert_eq!(description.port, host.test_addr.port().to_string());

    host.stop();
}

#[tokio::test]
async fn query_is_denied_without_acl_entry() {
    let allowed = SignKeyPair::generate();
    let outsider = SignKeyPair::generate();
    let host = start_host_with_acls(&format!("[\"{}\"]", allowed.public.hex()), "[]").await;

    let mut channel = host.connect_test(&allowed).await;
    assert!(client::query(&mut channel).await.is_ok());

    let mut channel = host.connect_test(&outsider).await;
    let err = client::query(&mut channel).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized), "got {err:?}");

    host.stop();
}

#[tokio::test]
async fn handshake_fails_against_the_wrong_server_identity() {
    let host = start_host().await;
    let keys = SignKeyPair::generate();
    let imposter = SignKeyPair::generate().public;

    let err = client::connect(
        "127.0.0.1",
        host.test_addr.port(),
        &keys,
        &imposter,
        TEST_BLOCKLEN,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Crypto(_)), "got {err:?}");

    host.stop();
}
