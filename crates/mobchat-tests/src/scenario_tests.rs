//! Join scenarios and connection lifecycle tests.
//!
//! Each test starts its own nodes on ephemeral loopback ports.

use crate::generators::{test_key, test_node};
use crate::harness::{link, wait_until, RawClient, TestNode, WAIT};
use mobchat_network::{
    Address, Command, Message, NetworkError, NodeId, Payload, PeerConnected, PeerDisconnected,
    HANDSHAKE_LEN,
};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Duration;

fn client_address() -> Address {
    Address::new(Ipv4Addr::LOCALHOST, 40_000)
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_full_node_answers_with_zero_address() {
    let x = TestNode::start_with(test_key(0), |c| c.max_incoming = 0).await;
    let mut client = RawClient::connect(x.addr, test_key(1)).await;

    let hello = Payload::Handshake(mobchat_network::Handshake::new(
        client.key.public_key().clone(),
        client_address(),
    ));
    client.send(Message::plain(&hello)).await;

    let mut response = None;
    while let Some(message) = client.recv(WAIT).await {
        if message.body.get(1) == Some(&(Command::HandshakeResponse as u8)) {
            response = Some(message);
            break;
        }
    }
    let response = response.expect("handshake response");
    assert!(!response.encrypted);
    assert_eq!(response.body.len(), HANDSHAKE_LEN);
    assert_eq!(&response.body[HANDSHAKE_LEN - 12..], &[0u8; 12]);

    // Rejected links stay in routing exchange and never become peers.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(x.handle.peer_count(), 0);
    assert!(x.handle.connections().iter().all(|c| !c.is_peer()));

    x.stop().await;
}

#[tokio::test]
async fn test_open_node_admits_raw_client() {
    let x = TestNode::start(test_key(0)).await;
    let mut client = RawClient::connect(x.addr, test_key(1)).await;

    let response = client.handshake(client_address()).await;
    assert_eq!(response.id, x.id());
    assert!(response.address.is_connection());
    assert_eq!(response.address.port, x.addr.port());

    let client_id = client.id();
    assert!(wait_until(|| x.handle.peer_count() == 1).await);
    assert!(x.handle.routing().contains(&client_id));

    // First contact with an unsynced node starts routing exchange.
    let check = client
        .recv_payload(|p| matches!(p, Payload::CheckRouting))
        .await;
    assert!(check.is_some());

    x.stop().await;
}

#[tokio::test]
async fn test_rejected_join_still_syncs_routing() {
    let mut x = TestNode::start_with(test_key(0), |c| c.max_incoming = 0).await;
    let mut y = TestNode::start(test_key(1)).await;

    y.connect_to(&x).await;

    let (xr, yr) = (x.handle.clone(), y.handle.clone());
    assert!(wait_until(|| xr.routing().len() == 2 && yr.routing().len() == 2).await);
    assert!(x.handle.routing().contains(&y.id()));
    assert!(y.handle.routing().contains(&x.id()));

    let synced = |e: &mobchat_network::NetworkEvent| {
        matches!(e, mobchat_network::NetworkEvent::RoutingSynced)
    };
    assert!(x.wait_for_event(synced).await.is_some());
    assert!(y.wait_for_event(synced).await.is_some());
    assert_eq!(x.handle.peer_count(), 0);
    assert_eq!(y.handle.peer_count(), 0);

    // The non-peer link is dropped once the exchange goes quiet.
    assert!(wait_until(|| xr.connections().is_empty() && yr.connections().is_empty()).await);

    y.stop().await;
    x.stop().await;
}

// ============================================================================
// Route finding
// ============================================================================

#[tokio::test]
async fn test_route_through_hub() {
    let a = TestNode::start_with(test_key(0), |c| c.max_outgoing = 1).await;
    let b = TestNode::start(test_key(1)).await;
    let c = TestNode::start_with(test_key(2), |c| c.max_outgoing = 1).await;

    link(&a, &b).await;
    link(&c, &b).await;

    let c_id = c.id();
    assert!(wait_until(|| a.handle.routing().contains(&c_id)).await);

    let routes = a.handle.find_route(c_id).await.expect("route response");
    assert_eq!(routes.len(), 1);
    let route = &routes[0];
    assert_eq!(route.ids(), vec![a.id(), b.id(), c_id]);
    assert_eq!(route.hops(), 2);

    a.stop().await;
    b.stop().await;
    c.stop().await;
}

#[tokio::test]
async fn test_route_never_revisits_requester() {
    let b = TestNode::start(test_key(1)).await;
    let mut a = RawClient::connect(b.addr, test_key(0)).await;
    a.handshake(client_address()).await;

    // A claims a link to C, which only A can reach.
    let c = test_node(2, Address::new(Ipv4Addr::new(10, 0, 0, 9), 5000));
    let c_id = c.id();
    let notice = PeerConnected::sign(&a.key, &c).unwrap();
    a.send(Message::plain(&Payload::PeerConnected(notice))).await;

    let a_id = a.id();
    assert!(
        wait_until(|| b
            .handle
            .routing()
            .connections_of(&a_id)
            .is_some_and(|ids| ids.contains(&c_id)))
        .await
    );

    let request = Message::plain(&Payload::GetRoute { target: c_id });
    let request_id = request.id();
    a.send(request).await;

    let Some(Payload::GetRouteResponse { request_id: answered, routes }) = a
        .recv_payload(|p| matches!(p, Payload::GetRouteResponse { .. }))
        .await
    else {
        panic!("no route response");
    };
    assert_eq!(answered, request_id);
    for route in &routes {
        let ids = route.ids();
        let distinct: BTreeSet<NodeId> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), ids.len(), "route repeats a node");
        assert_eq!(ids[0], a_id);
    }
    // The only way from B to C is back through A.
    assert!(routes.is_empty());

    b.stop().await;
}

#[tokio::test]
async fn test_find_route_without_peers() {
    let a = TestNode::start(test_key(0)).await;
    let result = a.handle.find_route(crate::generators::test_node_id(1)).await;
    assert!(matches!(result, Err(NetworkError::NotConnected(_))));
    a.stop().await;
}

// ============================================================================
// Gossip checks
// ============================================================================

#[tokio::test]
async fn test_unsolicited_routing_table_closes() {
    let x = TestNode::start(test_key(0)).await;
    let mut client = RawClient::connect(x.addr, test_key(1)).await;
    client.handshake(client_address()).await;
    assert!(wait_until(|| x.handle.peer_count() == 1).await);

    client
        .send(Message::plain(&Payload::GetRoutingResponse(Vec::new())))
        .await;
    assert!(client.closed_within(Duration::from_secs(2)).await);
    assert!(wait_until(|| x.handle.peer_count() == 0).await);

    x.stop().await;
}

#[tokio::test]
async fn test_disconnect_notice_applied_and_forwarded() {
    let x = TestNode::start(test_key(0)).await;
    let mut r1 = RawClient::connect(x.addr, test_key(1)).await;
    r1.handshake(client_address()).await;
    let mut r2 = RawClient::connect(x.addr, test_key(2)).await;
    r2.handshake(Address::new(Ipv4Addr::LOCALHOST, 40_003)).await;
    assert!(wait_until(|| x.handle.peer_count() == 2).await);

    let far = test_node(3, Address::new(Ipv4Addr::new(10, 0, 0, 7), 7000));
    let far_id = far.id();
    let r1_id = r1.id();
    let linked = |present: bool| {
        x.handle
            .routing()
            .connections_of(&r1_id)
            .is_some_and(|ids| ids.contains(&far_id) == present)
    };

    let connected = PeerConnected::sign(&r1.key, &far).unwrap();
    r1.send(Message::plain(&Payload::PeerConnected(connected))).await;
    assert!(wait_until(|| linked(true)).await);

    let disconnected = PeerDisconnected::sign(&r1.key, &far_id).unwrap();
    r1.send(Message::plain(&Payload::PeerDisconnected(disconnected)))
        .await;
    assert!(wait_until(|| linked(false)).await);

    let forwarded = r2
        .recv_payload(|p| matches!(p, Payload::PeerDisconnected(pd) if pd.peer == far_id))
        .await;
    let Some(Payload::PeerDisconnected(pd)) = forwarded else {
        panic!("disconnect notice not forwarded");
    };
    assert_eq!(pd.sender, r1_id);

    x.stop().await;
}

#[tokio::test]
async fn test_forged_connect_notice_ignored() {
    let x = TestNode::start(test_key(0)).await;
    let mut r1 = RawClient::connect(x.addr, test_key(1)).await;
    r1.handshake(client_address()).await;
    let mut r2 = RawClient::connect(x.addr, test_key(2)).await;
    r2.handshake(Address::new(Ipv4Addr::LOCALHOST, 40_004)).await;
    assert!(wait_until(|| x.handle.peer_count() == 2).await);

    let far = test_node(3, Address::new(Ipv4Addr::new(10, 0, 0, 8), 7001));
    let far_id = far.id();
    let notice = PeerConnected::sign(&r1.key, &far).unwrap();
    let mut body = Payload::PeerConnected(notice).encode();
    let last = body.len() - 1;
    body[last] ^= 0x01;
    r1.send(Message::new(body, false)).await;

    let forwarded = r2
        .recv_payload_within(Duration::from_millis(800), |p| {
            matches!(p, Payload::PeerConnected(pc) if pc.node.id() == far_id)
        })
        .await;
    assert!(forwarded.is_none());
    assert!(!x.handle.routing().contains(&far_id));
    // A bad signature drops the notice, not the link.
    assert_eq!(x.handle.peer_count(), 2);

    x.stop().await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_silent_client_times_out() {
    let x = TestNode::start(test_key(0)).await;
    let mut client = RawClient::connect(x.addr, test_key(1)).await;

    assert!(client.closed_within(Duration::from_secs(5)).await);
    assert!(wait_until(|| x.handle.connections().is_empty()).await);

    x.stop().await;
}

#[tokio::test]
async fn test_command_before_handshake_closes() {
    let x = TestNode::start(test_key(0)).await;
    let mut client = RawClient::connect(x.addr, test_key(1)).await;

    client.send(Message::plain(&Payload::CheckRouting)).await;
    assert!(client.closed_within(Duration::from_millis(400)).await);

    x.stop().await;
}

#[tokio::test]
async fn test_dial_self_makes_no_peer() {
    let x = TestNode::start(test_key(0)).await;
    x.connect_to(&x).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(wait_until(|| x.handle.connections().is_empty()).await);
    assert_eq!(x.handle.peer_count(), 0);
    assert_eq!(x.handle.routing().len(), 1);

    x.stop().await;
}

#[tokio::test]
async fn test_peer_disconnect_is_reported() {
    let a = TestNode::start(test_key(0)).await;
    let mut b = TestNode::start(test_key(1)).await;
    link(&a, &b).await;

    let a_id = a.id();
    a.stop().await;

    let event = b
        .wait_for_event(|e| {
            matches!(e, mobchat_network::NetworkEvent::PeerDisconnected { id } if *id == a_id)
        })
        .await;
    assert!(event.is_some());
    assert!(wait_until(|| b.handle.peer_count() == 0).await);

    b.stop().await;
}

#[tokio::test]
async fn test_reconnect_gives_up() {
    let mut a = TestNode::start(test_key(0)).await;
    let b = TestNode::start(test_key(1)).await;
    link(&a, &b).await;

    b.stop().await;

    let event = a
        .wait_for_event(|e| {
            matches!(
                e,
                mobchat_network::NetworkEvent::ConnectionFailed { error, .. }
                    if error.contains("gave up")
            )
        })
        .await;
    assert!(event.is_some());

    a.stop().await;
}

#[tokio::test]
async fn test_requests_fail_after_shutdown() {
    let a = TestNode::start(test_key(0)).await;
    let handle = a.handle.clone();
    a.stop().await;

    let result = handle.broadcast(&b"late"[..]).await;
    assert!(matches!(result, Err(NetworkError::ServiceStopped)));
}
