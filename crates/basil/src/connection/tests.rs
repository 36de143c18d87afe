use super::*;
use crate::alive::{SEQUENCE_NUM_PROP, SEQUENCE_NUM_RECEIVED_PROP, TIME_RECEIVED_PROP};
use crate::{handler_fn, AliveCheckHandler, OpDispatcher, SESSION_NOT_OPEN};
use async_trait::async_trait;
use basil_proto::JsonCodec;
use basil_transport::{StreamConfig, StreamTransport, Transport};
use bytes::Bytes;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use tokio::time::sleep;

const WAIT: Duration = Duration::from_secs(5);

/// A scripted peer speaking raw messages
struct Peer {
    protocol: Protocol,
    inbound: mpsc::UnboundedReceiver<Message>,
}

impl Peer {
    async fn recv(&mut self) -> Message {
        timeout(WAIT, self.inbound.recv())
            .await
            .expect("timed out waiting for message")
            .expect("peer channel closed")
    }

    fn reply(&self, request: &Message, props: PropertyBag) {
        self.protocol
            .send(request.make_response().with_props(&props))
            .unwrap();
    }
}

async fn connect_with(config: ConnectionConfig) -> (BasilConnection, Peer) {
    let (a, b) = StreamTransport::pair();
    let connection = BasilConnection::new(Protocol::new(Arc::new(a), Arc::new(JsonCodec)), config);
    let protocol = Protocol::new(Arc::new(b), Arc::new(JsonCodec));
    let (tx, inbound) = mpsc::unbounded_channel();
    protocol.set_receive_callback(Arc::new(move |result: std::result::Result<Message, ProtocolError>| {
        if let Ok(message) = result {
            let _ = tx.send(message);
        }
    }));
    connection.start().await.unwrap();
    protocol.start().await.unwrap();
    (connection, Peer { protocol, inbound })
}

async fn connect() -> (BasilConnection, Peer) {
    connect_with(ConnectionConfig::default()).await
}

/// Two connections joined back to back
async fn connected_pair() -> (BasilConnection, BasilConnection) {
    let (a, b) = StreamTransport::pair();
    let client = BasilConnection::new(
        Protocol::new(Arc::new(a), Arc::new(JsonCodec)),
        ConnectionConfig::default(),
    );
    let server = BasilConnection::new(
        Protocol::new(Arc::new(b), Arc::new(JsonCodec)),
        ConnectionConfig::default(),
    );
    client.start().await.unwrap();
    server.start().await.unwrap();
    (client, server)
}

async fn wait_for_pending(connection: &BasilConnection, count: usize) {
    timeout(WAIT, async {
        while connection.pending_rpcs().len() != count {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pending RPC count never reached");
}

/// Processor forwarding everything it sees into a channel
struct Recorder(mpsc::UnboundedSender<Message>);

#[async_trait]
impl IncomingMessageProcessor for Recorder {
    async fn process(&self, message: Message, _: &BasilConnection, _: &Protocol) -> Result<()> {
        let _ = self.0.send(message);
        Ok(())
    }
}

#[tokio::test]
async fn test_create_item_resolves_with_response() {
    let (connection, mut peer) = connect().await;
    let props = PropertyBag::new().with("layer", "default");

    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.create_item(&props).await }
    });

    let request = peer.recv().await;
    assert_eq!(request.op(), Some(Op::CreateItemReq));
    assert_eq!(request.i_props.get_str("layer"), Some("default"));
    assert!(request.s_code.is_some());
    peer.reply(&request, PropertyBag::new().with("id", "item-42"));

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.op(), Some(Op::CreateItemResp));
    assert_eq!(response.i_props.get_str("id"), Some("item-42"));
    assert!(connection.pending_rpcs().is_empty());
}

#[tokio::test]
async fn test_bad_frame_does_not_break_connection() {
    let (connection, mut peer) = connect().await;
    peer.protocol
        .transport()
        .send(Bytes::from_static(b"not a message"))
        .unwrap();

    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.alive_check().await }
    });
    let request = peer.recv().await;
    peer.reply(&request, PropertyBag::new());

    call.await.unwrap().unwrap();
    assert_eq!(connection.state(), ConnectionState::Open);
}

#[tokio::test]
async fn test_unauthorized_request_is_rejected() {
    let (connection, mut peer) =
        connect_with(ConnectionConfig::default().with_incoming_auth("secret")).await;
    let (tx, mut seen) = mpsc::unbounded_channel();
    connection.set_op_processor(Arc::new(Recorder(tx)));

    let mut request = Message::new(Op::CreateItemReq);
    request.s_code = Some("c1".into());
    request.auth = Some("wrong".into());
    peer.protocol.send(request).unwrap();

    let reply = peer.recv().await;
    assert_eq!(reply.r_code.as_deref(), Some("c1"));
    assert_eq!(reply.exception.as_deref(), Some(NOT_AUTHORIZED));

    let mut request = Message::new(Op::CreateItemReq);
    request.s_code = Some("c2".into());
    request.auth = Some("secret".into());
    peer.protocol.send(request).unwrap();

    // Only the authorized request reaches the processor.
    let processed = timeout(WAIT, seen.recv()).await.unwrap().unwrap();
    assert_eq!(processed.s_code.as_deref(), Some("c2"));
    assert!(seen.try_recv().is_err());
}

#[tokio::test]
async fn test_unauthorized_notification_gets_no_reply() {
    let (connection, mut peer) =
        connect_with(ConnectionConfig::default().with_incoming_auth("secret")).await;
    let (tx, mut seen) = mpsc::unbounded_channel();
    connection.set_op_processor(Arc::new(Recorder(tx)));

    peer.protocol.send(Message::new(Op::UpdatePropertiesReq)).unwrap();
    let mut probe = Message::new(Op::AliveCheckReq);
    probe.s_code = Some("probe".into());
    peer.protocol.send(probe).unwrap();

    let reply = peer.recv().await;
    assert_eq!(reply.r_code.as_deref(), Some("probe"));
    assert!(seen.try_recv().is_err());
}

#[tokio::test]
async fn test_set_authorizations_at_runtime() {
    let (connection, mut peer) = connect().await;
    connection.set_authorizations(Some(AuthToken::new("in")), Some(AuthToken::new("out")));

    connection.send(Message::new(Op::UpdatePropertiesReq), None).unwrap();
    assert_eq!(peer.recv().await.auth.as_deref(), Some("out"));

    let mut request = Message::new(Op::CreateItemReq);
    request.s_code = Some("r1".into());
    peer.protocol.send(request).unwrap();
    assert_eq!(peer.recv().await.exception.as_deref(), Some(NOT_AUTHORIZED));

    // Clearing the incoming token lets the default processor answer.
    connection.set_authorizations(None, None);
    let mut request = Message::new(Op::CreateItemReq);
    request.s_code = Some("r2".into());
    peer.protocol.send(request).unwrap();
    let reply = peer.recv().await;
    assert_eq!(reply.r_code.as_deref(), Some("r2"));
    assert_eq!(reply.exception.as_deref(), Some(SESSION_NOT_OPEN));
}

#[tokio::test]
async fn test_close_fails_pending_rpc() {
    let (connection, _peer) = connect().await;
    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.create_item(&PropertyBag::new()).await }
    });
    wait_for_pending(&connection, 1).await;

    connection.close();
    assert!(matches!(
        call.await.unwrap(),
        Err(BasilError::ConnectionClosed)
    ));
    assert!(connection.pending_rpcs().is_empty());
    assert!(!connection.when_ready().await);
    assert!(matches!(
        connection.alive_check().await,
        Err(BasilError::ConnectionClosed)
    ));

    // Idempotent
    connection.close();
    assert!(connection.is_closed());
}

#[tokio::test]
async fn test_peer_close_fails_pending_rpc() {
    let (connection, peer) = connect().await;
    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.delete_item("item-1", None).await }
    });
    wait_for_pending(&connection, 1).await;

    peer.protocol.close();
    let result = timeout(WAIT, call).await.unwrap().unwrap();
    assert!(matches!(result, Err(BasilError::ConnectionClosed)));
}

#[tokio::test]
async fn test_concurrent_rpcs_are_correlated() {
    const CALLS: usize = 50;
    let (connection, mut peer) = connect().await;

    let calls = (0..CALLS).map(|i| {
        let connection = connection.clone();
        async move {
            let item = format!("item-{}", i);
            let response = connection
                .update_properties(&item, &PropertyBag::new())
                .await?;
            Ok::<_, BasilError>((item, response))
        }
    });
    let calls = tokio::spawn(futures::future::join_all(calls));

    let mut requests = Vec::with_capacity(CALLS);
    for _ in 0..CALLS {
        requests.push(peer.recv().await);
    }
    let codes: HashSet<_> = requests.iter().filter_map(|r| r.s_code.clone()).collect();
    assert_eq!(codes.len(), CALLS);

    requests.shuffle(&mut rand::thread_rng());
    for request in &requests {
        let echo = request.i_id.clone().unwrap_or_default();
        peer.reply(request, PropertyBag::new().with("echo", echo));
    }

    for result in calls.await.unwrap() {
        let (item, response) = result.unwrap();
        assert_eq!(response.i_props.get_str("echo"), Some(item.as_str()));
    }
    assert!(connection.pending_rpcs().is_empty());
}

#[tokio::test]
async fn test_duplicate_response_is_dropped() {
    let (connection, mut peer) = connect().await;
    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.open_session(&PropertyBag::new()).await }
    });

    let request = peer.recv().await;
    peer.reply(&request, PropertyBag::new().with("n", 1));
    peer.reply(&request, PropertyBag::new().with("n", 2));

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.i_props.get_number("n"), Some(1.0));

    // The connection keeps working after the stray response.
    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.close_session(&PropertyBag::new()).await }
    });
    let request = peer.recv().await;
    peer.reply(&request, PropertyBag::new());
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_when_ready_resolves_on_open() {
    let (a, _b) = StreamTransport::pair();
    let connection = BasilConnection::new(
        Protocol::new(Arc::new(a), Arc::new(JsonCodec)),
        ConnectionConfig::default(),
    );
    let ready = tokio::spawn({
        let connection = connection.clone();
        async move { connection.when_ready().await }
    });

    connection.start().await.unwrap();
    assert!(timeout(WAIT, ready).await.unwrap().unwrap());
    // Already open resolves at once.
    assert!(connection.when_ready().await);
}

#[tokio::test]
async fn test_when_ready_resolves_false_on_close() {
    let (a, _b) = StreamTransport::pair();
    let connection = BasilConnection::new(
        Protocol::new(Arc::new(a), Arc::new(JsonCodec)),
        ConnectionConfig::default(),
    );
    let ready = tokio::spawn({
        let connection = connection.clone();
        async move { connection.when_ready().await }
    });
    sleep(Duration::from_millis(20)).await;

    connection.close();
    assert!(!timeout(WAIT, ready).await.unwrap().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_waiters_race_start() {
    const WAITERS: usize = 64;
    let (a, _b) = StreamTransport::pair();
    let connection = BasilConnection::new(
        Protocol::new(Arc::new(a), Arc::new(JsonCodec)),
        ConnectionConfig::default(),
    );

    let spawn_waiter = |connection: &BasilConnection| {
        let connection = connection.clone();
        tokio::spawn(async move { connection.when_ready().await })
    };
    let mut waiters: Vec<_> = (0..WAITERS / 2).map(|_| spawn_waiter(&connection)).collect();
    let start = tokio::spawn({
        let connection = connection.clone();
        async move { connection.start().await }
    });
    waiters.extend((0..WAITERS / 2).map(|_| spawn_waiter(&connection)));

    start.await.unwrap().unwrap();
    let results = timeout(WAIT, futures::future::join_all(waiters))
        .await
        .expect("waiters never resolved");
    assert!(results.into_iter().all(|ready| ready.unwrap()));
}

#[tokio::test]
async fn test_closed_transport_rejects_rpcs_at_once() {
    let (a, _b) = StreamTransport::pair();
    a.close();
    assert_eq!(a.state(), ConnectionState::Closed);
    let connection = BasilConnection::new(
        Protocol::new(Arc::new(a), Arc::new(JsonCodec)),
        ConnectionConfig::default().with_rpc_timeout(None),
    );

    let result = timeout(
        WAIT,
        connection.send_and_await_response(Message::new(Op::CreateItemReq)),
    )
    .await
    .expect("RPC on a closed transport should not wait");
    assert!(matches!(result, Err(BasilError::ConnectionClosed)));
    assert!(connection.pending_rpcs().is_empty());
    assert!(!connection.when_ready().await);
}

#[tokio::test]
async fn test_faulted_transport_rejects_rpcs_at_once() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = StreamTransport::connect(addr.to_string(), StreamConfig::new("faulted"));
    assert!(transport.start().await.is_err());
    let connection = BasilConnection::new(
        Protocol::new(Arc::new(transport), Arc::new(JsonCodec)),
        ConnectionConfig::default().with_rpc_timeout(None),
    );

    let result = timeout(WAIT, connection.alive_check())
        .await
        .expect("RPC on a faulted transport should not wait");
    assert!(matches!(result, Err(BasilError::ConnectionClosed)));
    assert!(!connection.when_ready().await);
}

#[tokio::test]
async fn test_non_finite_value_fails_without_waiting() {
    let (connection, mut peer) =
        connect_with(ConnectionConfig::default().with_rpc_timeout(None)).await;
    let props = PropertyBag::new().with("scale", f64::INFINITY);

    let result = timeout(WAIT, connection.create_item(&props))
        .await
        .expect("unencodable request should fail at once");
    assert!(matches!(
        result,
        Err(BasilError::Protocol(ProtocolError::Serialization(_)))
    ));
    assert!(connection.pending_rpcs().is_empty());

    // Nothing reached the wire; the next call still works.
    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.create_item(&PropertyBag::new().with("scale", 2.0)).await }
    });
    let request = peer.recv().await;
    assert_eq!(request.i_props.get_number("scale"), Some(2.0));
    peer.reply(&request, PropertyBag::new());
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rpc_timeout() {
    let (connection, mut peer) = connect_with(
        ConnectionConfig::default().with_rpc_timeout(Some(Duration::from_millis(100))),
    )
    .await;

    let result = connection
        .request_properties("item-7", Some("pos"))
        .await;
    assert!(matches!(result, Err(BasilError::Timeout { .. })));
    assert!(connection.pending_rpcs().is_empty());

    let request = peer.recv().await;
    assert_eq!(request.i_id.as_deref(), Some("item-7"));
    assert_eq!(request.i_props.get_str(FILTER_PROP), Some("pos"));
}

#[tokio::test]
async fn test_dropped_call_frees_pending_entry() {
    let (connection, _peer) = connect().await;
    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.make_connection(&PropertyBag::new()).await }
    });
    wait_for_pending(&connection, 1).await;

    call.abort();
    wait_for_pending(&connection, 0).await;
}

#[tokio::test]
async fn test_remote_exception() {
    let (connection, mut peer) = connect().await;
    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.add_ability("item-3", &PropertyBag::new()).await }
    });

    let request = peer.recv().await;
    peer.protocol
        .send(
            request
                .make_response()
                .with_exception("No such item")
                .with_exception_hint("iId", "item-3"),
        )
        .unwrap();

    match call.await.unwrap() {
        Err(BasilError::Remote { reason, hints }) => {
            assert_eq!(reason, "No such item");
            assert_eq!(hints.get("iId").map(String::as_str), Some("item-3"));
        }
        other => panic!("expected remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_default_processor_replies_not_open() {
    let (_connection, mut peer) = connect().await;

    // Notifications are dropped without a reply.
    peer.protocol.send(Message::new(Op::RemoveAbilityReq)).unwrap();
    let mut request = Message::new(Op::CreateItemReq);
    request.s_code = Some("q1".into());
    peer.protocol.send(request).unwrap();

    let reply = peer.recv().await;
    assert_eq!(reply.r_code.as_deref(), Some("q1"));
    assert_eq!(reply.op(), Some(Op::CreateItemResp));
    assert_eq!(reply.exception.as_deref(), Some(SESSION_NOT_OPEN));
}

#[tokio::test]
async fn test_outgoing_auth_attached() {
    let (connection, mut peer) =
        connect_with(ConnectionConfig::default().with_outgoing_auth("tok")).await;

    connection
        .send(Message::new(Op::UpdatePropertiesReq), None)
        .unwrap();
    let mut explicit = Message::new(Op::UpdatePropertiesReq);
    explicit.auth = Some("mine".into());
    connection
        .send(explicit, Some(&PropertyBag::new().with("extra", 1)))
        .unwrap();

    assert_eq!(peer.recv().await.auth.as_deref(), Some("tok"));
    let second = peer.recv().await;
    assert_eq!(second.auth.as_deref(), Some("mine"));
    assert_eq!(second.i_props.get_number("extra"), Some(1.0));

    let call = tokio::spawn({
        let connection = connection.clone();
        let token = AuthToken::new("item-secret");
        async move { connection.delete_item("item-9", Some(&token)).await }
    });
    let request = peer.recv().await;
    assert_eq!(request.i_auth.as_deref(), Some("item-secret"));
    assert_eq!(request.auth.as_deref(), Some("tok"));
    peer.reply(&request, PropertyBag::new());
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_dispatcher_add_replace_remove() {
    let (client, server) = connected_pair().await;
    let dispatcher = Arc::new(OpDispatcher::new().with_handler(
        Op::CreateItemReq,
        handler_fn(|request: Message, _| async move {
            let reply = request.make_response().with_props(&PropertyBag::new().with("id", "first"));
            Ok::<_, BasilError>(Some(reply))
        }),
    ));
    server.set_op_processor(dispatcher.clone());

    let response = client.create_item(&PropertyBag::new()).await.unwrap();
    assert_eq!(response.i_props.get_str("id"), Some("first"));

    // Handlers without a response envelope get one filled in.
    let previous = dispatcher.register(
        Op::CreateItemReq,
        handler_fn(|_, _| async move {
            let mut reply = Message::default();
            reply.i_props.insert("id", "second");
            Ok::<_, BasilError>(Some(reply))
        }),
    );
    assert!(previous.is_some());
    let response = client.create_item(&PropertyBag::new()).await.unwrap();
    assert_eq!(response.op(), Some(Op::CreateItemResp));
    assert_eq!(response.i_props.get_str("id"), Some("second"));

    assert!(dispatcher.remove(Op::CreateItemReq).is_some());
    assert!(!dispatcher.contains(Op::CreateItemReq));
    let err = client.create_item(&PropertyBag::new()).await.unwrap_err();
    assert!(matches!(err, BasilError::Remote { ref reason, .. } if reason == SESSION_NOT_OPEN));
}

#[tokio::test]
async fn test_handler_error_becomes_remote_error() {
    let (client, server) = connected_pair().await;
    server.set_op_processor(Arc::new(OpDispatcher::new().with_handler(
        Op::DeleteItemReq,
        handler_fn(|_, _| async move {
            Err::<Option<Message>, _>(BasilError::Configuration("item is locked".into()))
        }),
    )));

    let err = client.delete_item("item-1", None).await.unwrap_err();
    assert!(err.is_remote());
    assert!(err.to_string().contains("item is locked"));
}

#[tokio::test]
async fn test_alive_check_round_trip() {
    let (client, server) = connected_pair().await;
    server.set_op_processor(Arc::new(
        OpDispatcher::new().with_handler(Op::AliveCheckReq, AliveCheckHandler::new()),
    ));

    let response = client.alive_check().await.unwrap();
    assert_eq!(response.op(), Some(Op::AliveCheckResp));
    assert_eq!(response.i_props.get_str(SEQUENCE_NUM_RECEIVED_PROP), Some("1"));
    assert_eq!(response.i_props.get_str(SEQUENCE_NUM_PROP), Some("1"));
    assert_ne!(response.i_props.get_str(TIME_RECEIVED_PROP), Some("0"));

    let response = client.alive_check().await.unwrap();
    assert_eq!(response.i_props.get_str(SEQUENCE_NUM_RECEIVED_PROP), Some("2"));
}

#[tokio::test]
async fn test_pending_rpcs_snapshot() {
    let (connection, mut peer) = connect().await;
    let first = tokio::spawn({
        let connection = connection.clone();
        async move { connection.create_item(&PropertyBag::new()).await }
    });
    wait_for_pending(&connection, 1).await;
    let second = tokio::spawn({
        let connection = connection.clone();
        async move { connection.alive_check().await }
    });
    wait_for_pending(&connection, 2).await;

    let pending = connection.pending_rpcs();
    assert_eq!(pending[0].op, Op::CreateItemReq.code());
    assert_eq!(pending[1].op, Op::AliveCheckReq.code());
    assert!(pending[0].age >= pending[1].age);

    for _ in 0..2 {
        let request = peer.recv().await;
        peer.reply(&request, PropertyBag::new());
    }
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert!(connection.pending_rpcs().is_empty());
}

mod correlation_properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_any_reply_order_reaches_its_caller(
            order in Just((0..12usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            tokio_test::block_on(async {
                let (connection, mut peer) = connect().await;
                let calls: Vec<_> = (0..order.len())
                    .map(|i| {
                        let connection = connection.clone();
                        tokio::spawn(async move {
                            connection.request_properties(&format!("item-{}", i), None).await
                        })
                    })
                    .collect();

                let mut requests = Vec::with_capacity(order.len());
                for _ in 0..order.len() {
                    requests.push(peer.recv().await);
                }
                for &index in &order {
                    let request = &requests[index];
                    let echo = request.i_id.clone().unwrap_or_default();
                    peer.reply(request, PropertyBag::new().with("echo", echo));
                }

                for (i, call) in calls.into_iter().enumerate() {
                    let response = call.await.unwrap().unwrap();
                    let expected = format!("item-{}", i);
                    assert_eq!(response.i_props.get_str("echo"), Some(expected.as_str()));
                }
                assert!(connection.pending_rpcs().is_empty());
            });
        }
    }
}
