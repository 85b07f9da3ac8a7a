//! End-to-end transport behaviour against a scripted in-memory server.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use futures::StreamExt;
use gqlws_transport::{
    Dialect, GraphQLRequest, GraphqlWsTransport, Phase, SocketEvent, TransportError,
    TransportSettings,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{
    APOLLO, ClientFrame, GRAPHQL_WS, connected, mock, refusing_mock, settings, slow_mock,
};

// ── Connect & handshake ─────────────────────────────────────────────

#[tokio::test]
async fn graphql_transport_ws_is_detected() {
    let (transport, _server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    assert_eq!(transport.dialect(), Some(Dialect::GraphqlWs));
    assert_eq!(transport.phase(), Phase::Ready);
    assert!(transport.is_connected());
}

#[tokio::test]
async fn missing_subprotocol_means_apollo() {
    let (transport, _server, _acceptor) = connected(None, settings()).await;
    assert_eq!(transport.dialect(), Some(Dialect::Apollo));
}

#[tokio::test]
async fn init_payload_is_sent_and_ack_payload_kept() {
    let (connector, mut acceptor) = mock(Some(GRAPHQL_WS));
    let transport = GraphqlWsTransport::with_connector(
        TransportSettings {
            init_payload: json!({"token": "secret"}),
            ..settings()
        },
        connector,
    );

    let (result, _server) = tokio::join!(transport.connect(), async {
        let mut server = acceptor.accept().await;
        let init = server.recv().await;
        assert_eq!(
            init,
            json!({"type": "connection_init", "payload": {"token": "secret"}})
        );
        server.send(json!({"type": "connection_ack", "payload": {"session": "abc"}}));
        server
    });
    result.unwrap();
    assert_eq!(transport.ack_payload(), Some(json!({"session": "abc"})));
}

#[tokio::test]
async fn keep_alives_before_ack_are_ignored() {
    let (connector, mut acceptor) = mock(Some(APOLLO));
    let transport = GraphqlWsTransport::with_connector(settings(), connector);

    let (result, _server) = tokio::join!(transport.connect(), async {
        let mut server = acceptor.accept().await;
        let _init = server.recv().await;
        server.send(json!({"type": "ka"}));
        server.send(json!({"type": "ka"}));
        server.send(json!({"type": "connection_ack"}));
        server
    });
    result.unwrap();
    assert!(transport.is_connected());
}

#[tokio::test]
async fn other_message_before_ack_fails_connect() {
    let (connector, mut acceptor) = mock(Some(GRAPHQL_WS));
    let transport = GraphqlWsTransport::with_connector(settings(), connector);

    let (result, _server) = tokio::join!(transport.connect(), async {
        let mut server = acceptor.accept().await;
        let _init = server.recv().await;
        server.send(json!({"type": "next", "id": "1", "payload": {"data": {}}}));
        server
    });
    assert_matches!(result, Err(TransportError::Protocol(_)));
    assert_eq!(transport.phase(), Phase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn ack_timeout_fails_connect_and_sticks() {
    let (connector, mut acceptor) = mock(Some(GRAPHQL_WS));
    let transport = GraphqlWsTransport::with_connector(
        TransportSettings {
            ack_timeout_secs: Some(2.0),
            ..settings()
        },
        connector.clone(),
    );

    let (result, _server) = tokio::join!(transport.connect(), async {
        let mut server = acceptor.accept().await;
        let _init = server.recv().await;
        server
    });
    assert_matches!(result, Err(TransportError::Server(ref m)) if m.contains("connection_ack"));
    assert_eq!(transport.phase(), Phase::Disconnected);

    // no implicit reconnect once a connection was established
    let err = transport.subscribe("subscription { a }").await.unwrap_err();
    assert_matches!(err, TransportError::Server(_));
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn connect_twice_is_rejected() {
    let (transport, _server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    assert_matches!(
        transport.connect().await,
        Err(TransportError::AlreadyConnected)
    );
}

#[tokio::test(start_paused = true)]
async fn connect_while_connecting_is_rejected() {
    let (connector, mut acceptor) = slow_mock(Some(GRAPHQL_WS), Duration::from_secs(1));
    let transport = GraphqlWsTransport::with_connector(settings(), connector.clone());

    let (first, second, _server) = tokio::join!(
        transport.connect(),
        async {
            tokio::task::yield_now().await;
            assert_eq!(transport.phase(), Phase::Connecting);
            transport.connect().await
        },
        async {
            let mut server = acceptor.accept().await;
            let _ = server.handshake().await;
            server
        }
    );
    first.unwrap();
    assert_matches!(second, Err(TransportError::AlreadyConnected));
    assert_eq!(connector.connect_count(), 1);
    assert!(transport.is_connected());
}

#[tokio::test]
async fn connect_during_handshake_is_rejected() {
    let (connector, mut acceptor) = mock(Some(GRAPHQL_WS));
    let transport = GraphqlWsTransport::with_connector(settings(), connector.clone());

    let (first, _server) = tokio::join!(transport.connect(), async {
        let mut server = acceptor.accept().await;
        let _init = server.recv().await;
        assert_eq!(transport.phase(), Phase::Initializing);
        assert_matches!(transport.connect().await, Err(TransportError::AlreadyConnected));
        server.send(json!({"type": "connection_ack"}));
        server
    });
    first.unwrap();
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn refused_connection_leaves_transport_reusable() {
    let (connector, _acceptor) = refusing_mock();
    let transport = GraphqlWsTransport::with_connector(settings(), connector.clone());

    assert_matches!(transport.connect().await, Err(TransportError::Connect(_)));
    assert_eq!(transport.phase(), Phase::Disconnected);
    assert!(transport.close_error().is_none());

    // never connected, so the next operation tries again
    assert_matches!(
        transport.execute("query { a }").await,
        Err(TransportError::Connect(_))
    );
    assert_eq!(connector.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_bounds_the_upgrade() {
    let (connector, _acceptor) = slow_mock(Some(GRAPHQL_WS), Duration::from_secs(60));
    let transport = GraphqlWsTransport::with_connector(
        TransportSettings {
            connect_timeout_secs: Some(1.0),
            ..settings()
        },
        connector,
    );
    assert_matches!(transport.connect().await, Err(TransportError::Connect(_)));
    assert_eq!(transport.phase(), Phase::Disconnected);
}

#[tokio::test]
async fn first_operation_connects_implicitly() {
    let (connector, mut acceptor) = mock(Some(GRAPHQL_WS));
    let transport = GraphqlWsTransport::with_connector(settings(), connector);

    let (result, ()) = tokio::join!(transport.execute("query { a }"), async {
        let mut server = acceptor.accept().await;
        let _ = server.handshake().await;
        let start = server.recv().await;
        assert_eq!(start["type"], "subscribe");
        server.send(json!({"type": "next", "id": "1", "payload": {"data": {"a": 1}}}));
        server.send(json!({"type": "complete", "id": "1"}));
    });
    assert_eq!(result.unwrap().data, Some(json!({"a": 1})));
}

// ── Subscriptions ───────────────────────────────────────────────────

#[tokio::test]
async fn subscription_streams_until_complete() {
    let (transport, mut server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;

    let mut sub = transport.subscribe("subscription { tick }").await.unwrap();
    assert_eq!(sub.operation_id(), 1);
    assert_eq!(
        server.recv().await,
        json!({"type": "subscribe", "id": "1", "payload": {"query": "subscription { tick }"}})
    );

    server.send(json!({"type": "next", "id": "1", "payload": {"data": {"tick": 1}}}));
    server.send(json!({"type": "next", "id": "1", "payload": {"data": {"tick": 2}}}));
    server.send(json!({"type": "complete", "id": "1"}));

    let results: Vec<_> = sub.by_ref().collect().await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap().data, Some(json!({"tick": 1})));
    assert_eq!(results[1].as_ref().unwrap().data, Some(json!({"tick": 2})));
    assert_eq!(transport.active_operations(), 0);

    // completed by the server, so nothing is owed
    drop(sub);
    tokio::task::yield_now().await;
    assert!(server.is_quiet());
}

#[tokio::test]
async fn apollo_start_and_stop_on_drop() {
    let (transport, mut server, _acceptor) = connected(Some(APOLLO), settings()).await;

    let request = GraphQLRequest::new("subscription S($n: Int) { count(n: $n) }")
        .with_variables(json!({"n": 3}))
        .with_operation_name("S");
    let sub = transport.subscribe(request).await.unwrap();
    let start = server.recv().await;
    assert_eq!(start["type"], "start");
    assert_eq!(start["id"], "1");
    assert_eq!(start["payload"]["variables"], json!({"n": 3}));
    assert_eq!(start["payload"]["operationName"], "S");

    drop(sub);
    assert_eq!(server.recv().await, json!({"type": "stop", "id": "1"}));
    assert_eq!(transport.active_operations(), 0);
}

#[tokio::test]
async fn graphql_ws_stop_is_complete() {
    let (transport, mut server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    let sub = transport.subscribe("subscription { a }").await.unwrap();
    let _start = server.recv().await;

    sub.stop().await.unwrap();
    assert_eq!(server.recv().await, json!({"type": "complete", "id": "1"}));
    assert_eq!(transport.active_operations(), 0);
}

#[tokio::test]
async fn answers_are_routed_by_operation_id() {
    let (transport, mut server, _acceptor) = connected(Some(APOLLO), settings()).await;

    let mut first = transport.subscribe("subscription { a }").await.unwrap();
    let mut second = transport.subscribe("subscription { b }").await.unwrap();
    assert_eq!(first.operation_id(), 1);
    assert_eq!(second.operation_id(), 2);
    let _ = server.recv().await;
    let _ = server.recv().await;

    server.send(json!({"type": "data", "id": "2", "payload": {"data": {"b": 1}}}));
    server.send(json!({"type": "data", "id": 1, "payload": {"data": {"a": 1}}}));

    assert_eq!(
        second.next().await.unwrap().unwrap().data,
        Some(json!({"b": 1}))
    );
    assert_eq!(
        first.next().await.unwrap().unwrap().data,
        Some(json!({"a": 1}))
    );
}

#[tokio::test]
async fn answers_for_unknown_operations_are_dropped() {
    let (transport, mut server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    server.send(json!({"type": "next", "id": "99", "payload": {"data": {}}}));
    server.send(json!({"type": "complete", "id": "98"}));

    let mut sub = transport.subscribe("subscription { a }").await.unwrap();
    let _ = server.recv().await;
    server.send(json!({"type": "next", "id": "1", "payload": {"data": {"a": 2}}}));
    assert_eq!(sub.next().await.unwrap().unwrap().data, Some(json!({"a": 2})));
    assert!(transport.is_connected());
}

#[tokio::test]
async fn operation_error_ends_only_that_operation() {
    let (transport, mut server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;

    let mut failing = transport.subscribe("subscription { a }").await.unwrap();
    let mut healthy = transport.subscribe("subscription { b }").await.unwrap();
    let _ = server.recv().await;
    let _ = server.recv().await;

    server.send(json!({"type": "error", "id": "1", "payload": [{"message": "bad field"}]}));
    let err = failing.next().await.unwrap().unwrap_err();
    assert_matches!(err, TransportError::Query { operation_id: Some(1), ref message, .. } if message == "bad field");
    assert!(failing.next().await.is_none());

    server.send(json!({"type": "next", "id": "2", "payload": {"data": {"b": 1}}}));
    assert!(healthy.next().await.unwrap().is_ok());
    assert!(transport.is_connected());
    assert_eq!(transport.active_operations(), 1);
}

// ── Execute ─────────────────────────────────────────────────────────

#[tokio::test]
async fn execute_returns_first_result_without_stop() {
    let (transport, mut server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;

    let (result, ()) = tokio::join!(transport.execute("query { a }"), async {
        let start = server.recv().await;
        assert_eq!(start["type"], "subscribe");
        server.send(json!({"type": "next", "id": "1", "payload": {"data": {"a": 1}}}));
        server.send(json!({"type": "complete", "id": "1"}));
    });
    assert_eq!(result.unwrap().data, Some(json!({"a": 1})));
    assert_eq!(transport.active_operations(), 0);

    transport.close().await;
    assert_eq!(server.next_frame().await, Some(ClientFrame::Close));
}

#[tokio::test]
async fn execute_surfaces_query_error() {
    let (transport, mut server, _acceptor) = connected(Some(APOLLO), settings()).await;

    let (result, ()) = tokio::join!(transport.execute("query { nope }"), async {
        let _ = server.recv().await;
        server.send(json!({"type": "error", "id": "1", "payload": {"message": "Cannot query field"}}));
    });
    assert_matches!(result, Err(TransportError::Query { ref message, .. }) if message == "Cannot query field");
    assert!(transport.is_connected());
}

#[tokio::test]
async fn execute_without_result_is_a_query_error() {
    let (transport, mut server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;

    let (result, ()) = tokio::join!(transport.execute("query { a }"), async {
        let _ = server.recv().await;
        server.send(json!({"type": "complete", "id": "1"}));
    });
    assert_matches!(result, Err(TransportError::Query { operation_id: Some(1), ref message, .. })
        if message == "Query completed without any answer received from the server");
}

#[tokio::test]
async fn cancelled_execute_yields_no_answer() {
    let (transport, _server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = transport
        .execute_cancellable("query { slow }", cancel)
        .await
        .unwrap_err();
    assert_matches!(err, TransportError::Query { operation_id: Some(1), .. });
    assert_eq!(transport.active_operations(), 0);
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn protocol_violation_fails_every_operation() {
    let (transport, mut server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    let mut one = transport.subscribe("subscription { a }").await.unwrap();
    let mut two = transport.subscribe("subscription { b }").await.unwrap();
    let _ = server.recv().await;
    let _ = server.recv().await;

    server.send(json!({"type": "surprise"}));

    assert_matches!(one.next().await, Some(Err(TransportError::Protocol(_))));
    assert_matches!(two.next().await, Some(Err(TransportError::Protocol(_))));
    transport.wait_closed().await;
    assert_eq!(transport.phase(), Phase::Disconnected);

    // the failure sticks until an explicit connect
    assert_matches!(
        transport.subscribe("subscription { c }").await,
        Err(TransportError::Protocol(_))
    );
}

#[tokio::test]
async fn binary_frame_is_a_protocol_violation() {
    let (transport, server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    server.send_raw(SocketEvent::Binary(vec![0, 1, 2]));
    transport.wait_closed().await;
    assert_matches!(transport.close_error(), Some(TransportError::Protocol(_)));
}

#[tokio::test]
async fn apollo_connection_error_is_fatal() {
    let (transport, mut server, _acceptor) = connected(Some(APOLLO), settings()).await;
    let mut sub = transport.subscribe("subscription { a }").await.unwrap();
    let _ = server.recv().await;

    server.send(json!({"type": "connection_error", "payload": {"message": "unauthorized"}}));
    assert_matches!(sub.next().await, Some(Err(TransportError::Server(ref m))) if m.contains("unauthorized"));
    assert!(sub.next().await.is_none());
}

#[tokio::test]
async fn dropped_socket_resets_operations() {
    let (transport, mut server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    let mut sub = transport.subscribe("subscription { a }").await.unwrap();
    let _ = server.recv().await;

    drop(server);
    assert_matches!(sub.next().await, Some(Err(TransportError::ConnectionReset(_))));
    transport.wait_closed().await;
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn server_close_frame_resets_operations() {
    let (transport, mut server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    let mut sub = transport.subscribe("subscription { a }").await.unwrap();
    let _ = server.recv().await;

    server.send_raw(SocketEvent::Closed {
        code: Some(4400),
        reason: "Invalid message".into(),
    });
    assert_matches!(sub.next().await, Some(Err(TransportError::ConnectionReset(ref m))) if m.contains("4400"));
}

// ── Liveness ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn missing_keep_alive_fails_the_connection() {
    let (transport, mut server, _acceptor) = connected(
        Some(APOLLO),
        TransportSettings {
            keep_alive_timeout_secs: Some(5.0),
            ..settings()
        },
    )
    .await;
    let mut sub = transport.subscribe("subscription { a }").await.unwrap();
    let _ = server.recv().await;

    assert_matches!(sub.next().await, Some(Err(TransportError::Server(ref m))) if m.contains("keep_alive_timeout"));
    transport.wait_closed().await;
    assert_eq!(transport.phase(), Phase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn regular_keep_alives_keep_the_connection() {
    let (transport, server, _acceptor) = connected(
        Some(APOLLO),
        TransportSettings {
            keep_alive_timeout_secs: Some(5.0),
            ..settings()
        },
    )
    .await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(3)).await;
        server.send(json!({"type": "ka"}));
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn data_messages_do_not_count_as_keep_alives() {
    let (transport, mut server, _acceptor) = connected(
        Some(APOLLO),
        TransportSettings {
            keep_alive_timeout_secs: Some(5.0),
            ..settings()
        },
    )
    .await;
    let mut sub = transport.subscribe("subscription { a }").await.unwrap();
    let _ = server.recv().await;

    for n in 0..4 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        server.send(json!({"type": "data", "id": "1", "payload": {"data": {"n": n}}}));
    }
    let mut last = None;
    while let Some(item) = sub.next().await {
        last = Some(item);
    }
    assert_matches!(last, Some(Err(TransportError::Server(_))));
}

#[tokio::test]
async fn server_ping_is_answered() {
    let (transport, mut server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    server.send(json!({"type": "ping", "payload": {"t": 1}}));

    assert_eq!(server.recv().await, json!({"type": "pong"}));
    transport.wait_for_ping().await;
    assert_eq!(transport.last_ping_payload(), Some(json!({"t": 1})));
}

#[tokio::test(start_paused = true)]
async fn wait_for_ping_rearms_after_each_call() {
    let (transport, mut server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    server.send(json!({"type": "ping", "payload": {"n": 1}}));
    let _ = server.recv().await;

    // already seen, so this returns at once
    transport.wait_for_ping().await;
    assert!(
        tokio::time::timeout(Duration::from_secs(5), transport.wait_for_ping())
            .await
            .is_err()
    );

    server.send(json!({"type": "ping", "payload": {"n": 2}}));
    transport.wait_for_ping().await;
    assert_eq!(transport.last_ping_payload(), Some(json!({"n": 2})));
}

#[tokio::test]
async fn server_ping_left_unanswered_when_disabled() {
    let (transport, mut server, _acceptor) = connected(
        Some(GRAPHQL_WS),
        TransportSettings {
            answer_pings: false,
            ..settings()
        },
    )
    .await;
    server.send(json!({"type": "ping"}));
    transport.wait_for_ping().await;

    let _sub = transport.subscribe("subscription { a }").await.unwrap();
    assert_eq!(server.recv().await["type"], "subscribe");
}

#[tokio::test]
async fn manual_ping_and_pong() {
    let (transport, mut server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;

    transport.send_ping(Some(json!({"k": "v"}))).await.unwrap();
    assert_eq!(server.recv().await, json!({"type": "ping", "payload": {"k": "v"}}));
    server.send(json!({"type": "pong", "payload": {"k": "v"}}));
    transport.wait_for_pong().await;
    assert_eq!(transport.last_pong_payload(), Some(json!({"k": "v"})));

    transport.send_pong(None).await.unwrap();
    assert_eq!(server.recv().await, json!({"type": "pong"}));
}

#[tokio::test]
async fn apollo_has_no_ping() {
    let (transport, _server, _acceptor) = connected(Some(APOLLO), settings()).await;
    assert_matches!(
        transport.send_ping(None).await,
        Err(TransportError::Protocol(_))
    );
    assert!(transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn unanswered_ping_fails_the_connection() {
    let (transport, mut server, _acceptor) = connected(
        Some(GRAPHQL_WS),
        TransportSettings {
            ping_interval_secs: Some(10.0),
            pong_timeout_secs: Some(2.0),
            ..settings()
        },
    )
    .await;
    let mut sub = transport.subscribe("subscription { a }").await.unwrap();
    let _ = server.recv().await;

    assert_matches!(sub.next().await, Some(Err(TransportError::Server(ref m))) if m.contains("No pong"));
}

#[tokio::test(start_paused = true)]
async fn answered_pings_keep_the_connection() {
    let (transport, mut server, _acceptor) = connected(
        Some(GRAPHQL_WS),
        TransportSettings {
            ping_interval_secs: Some(10.0),
            ..settings()
        },
    )
    .await;

    for _ in 0..3 {
        assert_eq!(server.recv().await, json!({"type": "ping"}));
        server.send(json!({"type": "pong"}));
    }
    assert!(transport.is_connected());
}

// ── Close ───────────────────────────────────────────────────────────

#[tokio::test]
async fn clean_close_stops_operations_and_terminates() {
    let (transport, mut server, _acceptor) = connected(Some(APOLLO), settings()).await;
    let mut sub = transport.subscribe("subscription { a }").await.unwrap();
    let _ = server.recv().await;

    let ((), ()) = tokio::join!(transport.close(), async {
        assert_eq!(server.recv().await, json!({"type": "stop", "id": "1"}));
        server.send(json!({"type": "complete", "id": "1"}));
        assert_eq!(server.recv().await, json!({"type": "connection_terminate"}));
        assert_eq!(server.next_frame().await, Some(ClientFrame::Close));
    });

    assert_eq!(transport.phase(), Phase::Disconnected);
    assert!(sub.next().await.is_none());
    assert_matches!(transport.close_error(), Some(TransportError::Closed(_)));
}

#[tokio::test(start_paused = true)]
async fn close_timeout_bounds_the_wait() {
    let (transport, mut server, _acceptor) = connected(
        Some(GRAPHQL_WS),
        TransportSettings {
            close_timeout_secs: Some(3.0),
            ..settings()
        },
    )
    .await;
    let mut sub = transport.subscribe("subscription { a }").await.unwrap();
    let _ = server.recv().await;

    transport.close().await;
    assert_eq!(server.recv().await, json!({"type": "complete", "id": "1"}));
    assert_eq!(server.next_frame().await, Some(ClientFrame::Close));
    assert_matches!(sub.next().await, Some(Err(TransportError::Closed(ref m))) if m.contains("closed by user"));
}

#[tokio::test(start_paused = true)]
async fn failure_during_clean_close_is_discarded() {
    let (transport, mut server, _acceptor) = connected(
        Some(APOLLO),
        TransportSettings {
            close_timeout_secs: Some(3.0),
            ..settings()
        },
    )
    .await;
    let mut sub = transport.subscribe("subscription { a }").await.unwrap();
    let _ = server.recv().await;

    let ((), ()) = tokio::join!(transport.close(), async {
        assert_eq!(server.recv().await, json!({"type": "stop", "id": "1"}));
        server.send(json!({"type": "bogus"}));
        assert_eq!(server.recv().await, json!({"type": "connection_terminate"}));
        assert_eq!(server.next_frame().await, Some(ClientFrame::Close));
    });

    // one shutdown only: the socket is released with nothing further written
    assert_eq!(server.next_frame().await, None);
    assert_eq!(transport.phase(), Phase::Disconnected);
    assert_matches!(transport.close_error(), Some(TransportError::Closed(ref m)) if m.contains("closed by user"));
    assert_matches!(sub.next().await, Some(Err(TransportError::Closed(_))));
}

#[tokio::test]
async fn close_after_fatal_error_keeps_first_cause() {
    let (transport, mut server, _acceptor) = connected(Some(APOLLO), settings()).await;
    let mut sub = transport.subscribe("subscription { a }").await.unwrap();
    let _ = server.recv().await;

    server.send(json!({"type": "connection_error", "payload": {"message": "unauthorized"}}));
    server.send(json!({"type": "bogus"}));
    assert_matches!(sub.next().await, Some(Err(TransportError::Server(_))));
    transport.close().await;

    assert_eq!(transport.phase(), Phase::Disconnected);
    assert_matches!(
        transport.close_error(),
        Some(TransportError::Server(ref m)) if m.contains("unauthorized")
    );
    // non-clean: no stop or terminate was written
    assert_eq!(server.next_frame().await, Some(ClientFrame::Close));
    assert_eq!(server.next_frame().await, None);
}

#[tokio::test]
async fn close_is_idempotent() {
    let never_connected = GraphqlWsTransport::with_connector(settings(), mock(None).0);
    never_connected.close().await;

    let (transport, _server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    transport.close().await;
    transport.close().await;
    assert_eq!(transport.phase(), Phase::Disconnected);
    assert_matches!(
        transport.execute("query { a }").await,
        Err(TransportError::Closed(_))
    );
}

#[tokio::test]
async fn reconnect_after_close_restarts_ids() {
    let (transport, mut server, mut acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    let sub = transport.subscribe("subscription { a }").await.unwrap();
    assert_eq!(server.recv().await["id"], "1");
    drop(sub);
    transport.close().await;

    let (result, mut server) = tokio::join!(transport.connect(), async {
        let mut server = acceptor.accept().await;
        let _ = server.handshake().await;
        server
    });
    result.unwrap();
    assert!(transport.close_error().is_none());

    let _sub = transport.subscribe("subscription { a }").await.unwrap();
    assert_eq!(server.recv().await["id"], "1");
}

#[tokio::test]
async fn dropping_the_transport_closes_the_socket() {
    let (transport, mut server, _acceptor) = connected(Some(GRAPHQL_WS), settings()).await;
    drop(transport);
    server.expect_close().await;
}
