//! The capabilities broker service, driven end to end over one host:
//! a registrant holds a broker channel open, a requester asks through the
//! broker, and the relayed capability admits the requester to the target
//! service.

use std::time::Duration;

use crate::*;

use capone_core::cap::Rights;
use capone_core::client;
use capone_core::keys::SignKeyPair;
use capone_core::proto::{CapabilityMessage, CapabilityRequest};
use capone_services::plugin::plugin_for;

async fn broker_session(
    host: &TestHost,
    keys: &SignKeyPair,
    args: &[String],
) -> capone_core::channel::Channel {
    let params = plugin_for("capabilities")
        .unwrap()
        .parse_params(args)
        .unwrap();
    let mut channel = host.connect_broker(keys).await;
    let (identifier, cap) = client::request_session(&mut channel, params).await.unwrap();
    let mut connected = host.connect_broker(keys).await;
    client::start_session(&mut connected, identifier, &cap)
        .await
        .unwrap();
    connected
}

#[tokio::test]
async fn broker_relays_a_capability_to_the_requester() {
    let host = start_host().await;
    let registrant = SignKeyPair::generate();
    let requester = SignKeyPair::generate();

    // Registrant goes online with the broker.
    let mut registrant_channel =
        broker_session(&host, &registrant, &["register".to_string()]).await;

    // Requester asks the broker to have the registrant obtain a session on
    // the test service.
    let request_args = vec![
        "request".to_string(),
        registrant.public.hex(),
        host.public.hex(),
        "127.0.0.1".to_string(),
        host.test_addr.port().to_string(),
        "brokered-job".to_string(),
    ];
    let mut requester_channel = broker_session(&host, &requester, &request_args).await;

    // The broker forwards the request over the registrant's channel.
    let forwarded: CapabilityRequest = registrant_channel.read_message().await.unwrap();
    assert_eq!(forwarded.requester, requester.public);
    assert_eq!(forwarded.service_identity, host.public);
    assert_eq!(forwarded.service_port, host.test_addr.port().to_string());

    // Registrant fulfills it: session on the test service, EXEC delegated
    // to the requester.
    let mut service_channel = host.connect_test(&registrant).await;
    let (identifier, cap) =
        client::request_session(&mut service_channel, forwarded.parameters.clone())
            .await
            .unwrap();
    let delegated = cap.delegate(Rights::EXEC, forwarded.requester).unwrap();
    registrant_channel
        .write_message(&CapabilityMessage {
            identifier,
            cap: delegated,
            service_address: forwarded.service_address.clone(),
            service_port: forwarded.service_port.clone(),
        })
        .await
        .unwrap();

    // The requester receives it through the broker and gets in.
    let answer: CapabilityMessage = requester_channel.read_message().await.unwrap();
    assert_eq!(answer.identifier, identifier);

    let mut final_channel = host.connect_test(&requester).await;
    client::start_session(&mut final_channel, answer.identifier, &answer.cap)
        .await
        .unwrap();

    let served = host.test_plugin.served();
    assert_eq!(served.len(), 1);
    assert_eq!(served[0].invoker, requester.public);
    assert_eq!(served[0].args, vec!["brokered-job".to_string()]);

    host.stop();
}

#[tokio::test]
async fn registrant_is_torn_down_when_its_channel_drops() {
    let host = start_host().await;
    let registrant = SignKeyPair::generate();

    let registrant_channel = broker_session(&host, &registrant, &["register".to_string()]).await;

    // Wait for the registration to land.
    wait_for(|| host.broker_plugin.registrant_count() == 1).await;

    drop(registrant_channel);
    wait_for(|| host.broker_plugin.registrant_count() == 0).await;

    host.stop();
}

#[tokio::test]
async fn request_for_an_unknown_registrant_fails() {
    let host = start_host().await;
    let requester = SignKeyPair::generate();
    let nobody = SignKeyPair::generate();

    let request_args = vec![
        "request".to_string(),
        nobody.public.hex(),
        host.public.hex(),
        "127.0.0.1".to_string(),
        host.test_addr.port().to_string(),
    ];
    let params = plugin_for("capabilities")
        .unwrap()
        .parse_params(&request_args)
        .unwrap();

    let mut channel = host.connect_broker(&requester).await;
    let (identifier, cap) = client::request_session(&mut channel, params).await.unwrap();
    let mut connected = host.connect_broker(&requester).await;
    // The Connect itself is authorized; the serve phase then fails and the
    // channel just closes without a CapabilityMessage.
    client::start_session(&mut connected, identifier, &cap)
        .await
        .unwrap();
    assert!(connected
        .read_message::<CapabilityMessage>()
        .await
        .is_err());

    host.stop();
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within 2s");
}
