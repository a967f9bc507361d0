//! End-to-end tests of the client against an in-memory core.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    connect_pair, init_tracing, ok, reply, request_error, ConnectBehavior, CoreSide,
    FakeConnector,
};
use glide_ipc::error::UNEXPECTED_EOF_MESSAGE;
use glide_ipc::{
    ClientConfig, ClientError, ClusterScanCursor, ConnectionState, GlideClient, RequestErrorKind,
    RequestType, Route, ScanOptions,
};
use glide_ipc_core::proto::{self, command, command_request, response};
use glide_ipc_core::{HandleRegistry, Value};
use rand::seq::SliceRandom;

fn inline_args(request: &proto::CommandRequest) -> Vec<Vec<u8>> {
    match &request.command {
        Some(command_request::Command::SingleCommand(proto::Command {
            args: Some(command::Args::ArgsArray(array)),
            ..
        })) => array.args.clone(),
        other => panic!("expected inline single command, got {other:?}"),
    }
}

#[tokio::test]
async fn test_get_returns_value() {
    let (client, mut core) = connect_pair(ClientConfig::default()).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.custom_command(["GET", "k"]).await }
    });

    let request = core.read_command().await;
    assert_eq!(inline_args(&request), vec![b"GET".to_vec(), b"k".to_vec()]);
    let response = core.value_reply(request.callback_idx, Value::from("v1"));
    core.send(&[response]).await;

    assert_eq!(call.await.expect("task"), Ok(Value::from("v1")));
    client.close(None).await;
}

#[tokio::test]
async fn test_request_error_kinds() {
    let (client, mut core) = connect_pair(ClientConfig::default()).await;

    for (wire, kind) in [
        (proto::RequestErrorType::Timeout, RequestErrorKind::Timeout),
        (proto::RequestErrorType::Disconnect, RequestErrorKind::Disconnect),
        (proto::RequestErrorType::ExecAbort, RequestErrorKind::ExecAbort),
        (proto::RequestErrorType::Unspecified, RequestErrorKind::Unspecified),
    ] {
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.custom_command(["GET", "k"]).await }
        });
        let request = core.read_command().await;
        core.send(&[request_error(request.callback_idx, wire, "t")]).await;

        assert_eq!(
            call.await.expect("task"),
            Err(ClientError::Request {
                kind,
                message: "t".to_string()
            })
        );
    }

    // A request error leaves the connection usable.
    assert_eq!(client.state(), ConnectionState::Ready);
    client.close(None).await;
}

#[tokio::test]
async fn test_close_fails_pending_call() {
    let (client, mut core) = connect_pair(ClientConfig::default()).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.custom_command(["BLPOP", "q", "0"]).await }
    });
    let _ = core.read_command().await;
    assert_eq!(client.in_flight(), 1);

    client.close(Some("shutting down".to_string())).await;

    assert_eq!(
        call.await.expect("task"),
        Err(ClientError::Closing("shutting down".to_string()))
    );
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.in_flight(), 0);
    core.expect_eof().await;
}

#[tokio::test]
async fn test_shutdown_fails_every_pending_call() {
    const K: usize = 10;
    let (client, mut core) = connect_pair(ClientConfig::default()).await;

    let calls: Vec<_> = (0..K)
        .map(|i| {
            let client = client.clone();
            let key = format!("k{i}");
            tokio::spawn(async move { client.custom_command(["GET", key.as_str()]).await })
        })
        .collect();
    let _ = core.read_commands(K).await;

    client.close(None).await;

    for call in calls {
        let result = tokio::time::timeout(Duration::from_secs(5), call)
            .await
            .expect("no call left hanging")
            .expect("task");
        assert!(matches!(result, Err(ClientError::Closing(_))));
    }
}

async fn wait_in_flight(client: &GlideClient, n: usize) {
    while client.in_flight() < n {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_cancelled_caller_does_not_cut_the_stream() {
    let config = ClientConfig::default().with_max_inline_args_len(usize::MAX);
    let (client, mut core) = connect_pair(config).await;
    let big = vec![b'x'; 128 * 1024];

    // Larger than the pipe, so the flush blocks until the core reads.
    let first = tokio::spawn({
        let client = client.clone();
        let big = big.clone();
        async move {
            client
                .custom_command([b"SET".to_vec(), b"big".to_vec(), big])
                .await
        }
    });
    wait_in_flight(&client, 1).await;
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.custom_command(["GET", "k"]).await }
    });
    wait_in_flight(&client, 2).await;

    first.abort();
    assert!(first.await.expect_err("aborted").is_cancelled());

    let requests = core.read_commands(2).await;
    assert_eq!(
        inline_args(&requests[0]),
        vec![b"SET".to_vec(), b"big".to_vec(), big]
    );
    assert_eq!(inline_args(&requests[1]), vec![b"GET".to_vec(), b"k".to_vec()]);

    core.send(&[
        ok(requests[0].callback_idx),
        reply(
            requests[1].callback_idx,
            response::Payload::InlineValue(b"v".to_vec()),
        ),
    ])
    .await;
    assert_eq!(second.await.expect("task"), Ok(Value::from("v")));
    assert_eq!(client.state(), ConnectionState::Ready);
    client.close(None).await;
}

#[tokio::test]
async fn test_close_while_core_stops_reading() {
    let config = ClientConfig::default().with_max_inline_args_len(usize::MAX);
    let (client, _core) = connect_pair(config).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .custom_command([b"SET".to_vec(), b"big".to_vec(), vec![b'x'; 256 * 1024]])
                .await
        }
    });
    wait_in_flight(&client, 1).await;

    tokio::time::timeout(Duration::from_secs(5), client.close(None))
        .await
        .expect("close must not wait for the core to read");
    assert_eq!(client.state(), ConnectionState::Closed);

    let result = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .expect("caller resolved")
        .expect("task");
    assert!(matches!(result, Err(ClientError::Closing(_))));
}

#[tokio::test]
async fn test_statistics_come_from_the_core() {
    let (client, core) = connect_pair(ClientConfig::default()).await;
    core.registry.store_value(Value::Nil);

    let stats = client.get_statistics();
    assert_eq!(stats.get("issued_handles"), Some(&1));
    assert_eq!(stats.get("live_handles"), Some(&1));
    client.close(None).await;
}

#[tokio::test]
async fn test_closed_client_rejects_calls() {
    let (client, mut core) = connect_pair(ClientConfig::default()).await;
    client.close(None).await;
    client.close(None).await;

    assert_eq!(
        client.custom_command(["PING"]).await,
        Err(ClientError::closed())
    );
    assert_eq!(
        client
            .execute_transaction(vec![(RequestType::Ping, vec![])], None)
            .await,
        Err(ClientError::closed())
    );
    core.expect_eof().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reordered_replies_reach_their_callers() {
    const N: usize = 32;
    let (client, mut core) = connect_pair(ClientConfig::default()).await;

    let calls: Vec<_> = (0..N)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let key = format!("key-{i}");
                let value = client.custom_command(["GET", key.as_str()]).await;
                (key, value)
            })
        })
        .collect();

    let mut requests = core.read_commands(N).await;
    let mut ids: Vec<u32> = requests.iter().map(|r| r.callback_idx).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), N, "ids must be unique while in flight");

    requests.shuffle(&mut rand::thread_rng());
    let responses: Vec<_> = requests
        .iter()
        .map(|request| {
            let key = inline_args(request).pop().expect("key arg");
            core.value_reply(request.callback_idx, Value::from(key))
        })
        .collect();
    core.send(&responses).await;

    for call in calls {
        let (key, value) = call.await.expect("task");
        assert_eq!(value, Ok(Value::from(key.as_str())));
    }
    assert_eq!(client.in_flight(), 0);
    client.close(None).await;
}

#[tokio::test]
async fn test_replies_split_into_single_bytes() {
    let (client, mut core) = connect_pair(ClientConfig::default().with_read_buffer_size(3)).await;

    let calls: Vec<_> = (0..4)
        .map(|i| {
            let client = client.clone();
            let payload = "x".repeat(i * 50);
            tokio::spawn(async move { client.custom_command(["ECHO", payload.as_str()]).await })
        })
        .collect();
    let requests = core.read_commands(4).await;

    let responses: Vec<_> = requests
        .iter()
        .map(|request| {
            let payload = inline_args(request).pop().expect("payload");
            reply(request.callback_idx, response::Payload::InlineValue(payload))
        })
        .collect();
    core.send_bytewise(&responses).await;

    let mut lengths = Vec::new();
    for call in calls {
        match call.await.expect("task") {
            Ok(Value::BulkString(bytes)) => lengths.push(bytes.len()),
            other => panic!("unexpected reply {other:?}"),
        }
    }
    assert_eq!(lengths, vec![0, 50, 100, 150]);
    client.close(None).await;
}

#[tokio::test]
async fn test_large_arguments_go_by_handle() {
    let config = ClientConfig::default().with_max_inline_args_len(64);
    let (client, mut core) = connect_pair(config).await;
    let big = vec![b'z'; 100];

    let call = tokio::spawn({
        let client = client.clone();
        let big = big.clone();
        async move {
            client
                .custom_command(vec![b"SET".to_vec(), b"k".to_vec(), big])
                .await
        }
    });

    let request = core.read_command().await;
    let handle = match &request.command {
        Some(command_request::Command::SingleCommand(proto::Command {
            args: Some(command::Args::ArgsVecPointer(handle)),
            ..
        })) => *handle,
        other => panic!("expected args by handle, got {other:?}"),
    };
    assert_eq!(
        core.registry.take_args(handle),
        Ok(vec![b"SET".to_vec(), b"k".to_vec(), big])
    );

    core.reply_ok(request.callback_idx).await;
    assert_eq!(call.await.expect("task"), Ok(Value::Okay));
    client.close(None).await;
}

#[tokio::test]
async fn test_ids_recycled_after_reply() {
    let (client, mut core) = connect_pair(ClientConfig::default()).await;

    for _ in 0..3 {
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.custom_command(["PING"]).await }
        });
        let request = core.read_command().await;
        // The handshake released id 0; sequential calls keep reusing it.
        assert_eq!(request.callback_idx, 0);
        core.reply_ok(request.callback_idx).await;
        assert_eq!(call.await.expect("task"), Ok(Value::Okay));
    }
    client.close(None).await;
}

#[tokio::test]
async fn test_unknown_callback_index_closes_connection() {
    let (client, mut core) = connect_pair(ClientConfig::default()).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.custom_command(["GET", "k"]).await }
    });
    let _ = core.read_command().await;
    core.send(&[ok(99)]).await;

    assert_eq!(
        call.await.expect("task"),
        Err(ClientError::Closing(
            "Client Error - closing due to unknown error. callback index:  99".to_string()
        ))
    );
    assert!(client.state().is_closing());
    assert_eq!(
        client.custom_command(["PING"]).await,
        Err(ClientError::closed())
    );
}

#[tokio::test]
async fn test_closing_error_fails_only_that_call() {
    let (client, mut core) = connect_pair(ClientConfig::default()).await;

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.custom_command(["GET", "a"]).await }
    });
    let request = core.read_command().await;
    core.send(&[reply(
        request.callback_idx,
        response::Payload::ClosingError("node gone".to_string()),
    )])
    .await;
    assert_eq!(
        first.await.expect("task"),
        Err(ClientError::Closing("node gone".to_string()))
    );

    let second = tokio::spawn({
        let client = client.clone();
        async move { client.custom_command(["GET", "b"]).await }
    });
    let request = core.read_command().await;
    core.reply_ok(request.callback_idx).await;
    assert_eq!(second.await.expect("task"), Ok(Value::Okay));
    client.close(None).await;
}

#[tokio::test]
async fn test_core_hang_up_fails_pending_calls() {
    let (client, mut core) = connect_pair(ClientConfig::default()).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.custom_command(["GET", "k"]).await }
    });
    let _ = core.read_command().await;
    core.hang_up();

    assert_eq!(
        call.await.expect("task"),
        Err(ClientError::Closing(UNEXPECTED_EOF_MESSAGE.to_string()))
    );
    assert!(client.state().is_closing());
}

#[tokio::test]
async fn test_handshake_must_return_ok() {
    init_tracing();
    let registry = Arc::new(HandleRegistry::new());
    let (connector, server_end) = FakeConnector::new(ConnectBehavior::Accept);
    let connecting = tokio::spawn({
        let registry = registry.clone();
        async move { GlideClient::connect(ClientConfig::default(), &connector, registry).await }
    });

    let mut core = CoreSide::new(server_end.await.expect("server end"), registry);
    let _ = core.read_connection_request().await;
    let response = core.value_reply(0, Value::Int(1));
    core.send(&[response]).await;

    let result = connecting.await.expect("task");
    assert!(matches!(result, Err(ClientError::Closing(_))));
    core.expect_eof().await;
}

#[tokio::test]
async fn test_handshake_request_error_fails_setup() {
    init_tracing();
    let registry = Arc::new(HandleRegistry::new());
    let (connector, server_end) = FakeConnector::new(ConnectBehavior::Accept);
    let connecting = tokio::spawn({
        let registry = registry.clone();
        async move { GlideClient::connect(ClientConfig::default(), &connector, registry).await }
    });

    let mut core = CoreSide::new(server_end.await.expect("server end"), registry);
    let request = core.read_connection_request().await;
    assert_eq!(request.addresses.len(), 1);
    core.send(&[request_error(
        0,
        proto::RequestErrorType::Unspecified,
        "WRONGPASS invalid username-password pair",
    )])
    .await;

    match connecting.await.expect("task") {
        Err(ClientError::Closing(message)) => assert!(message.contains("WRONGPASS")),
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn test_listener_error_fails_setup() {
    let (connector, _server_end) =
        FakeConnector::new(ConnectBehavior::ListenerError("no socket dir".to_string()));
    let result = GlideClient::connect(
        ClientConfig::default(),
        &connector,
        Arc::new(HandleRegistry::new()),
    )
    .await;

    match result {
        Err(ClientError::Closing(message)) => assert!(message.contains("no socket dir")),
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_timeout() {
    let (connector, _server_end) = FakeConnector::new(ConnectBehavior::Hang);
    let config = ClientConfig::default().with_connect_timeout(Duration::from_millis(20));
    let result =
        GlideClient::connect(config, &connector, Arc::new(HandleRegistry::new())).await;

    match result {
        Err(ClientError::Closing(message)) => assert!(message.contains("timed out")),
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn test_transaction_and_script_envelopes() {
    let (client, mut core) = connect_pair(ClientConfig::default()).await;

    let transaction = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .execute_transaction(
                    vec![
                        (RequestType::Set, vec![b"k".to_vec(), b"v".to_vec()]),
                        (RequestType::Get, vec![b"k".to_vec()]),
                    ],
                    Some(&Route::AllPrimaries),
                )
                .await
        }
    });
    let request = core.read_command().await;
    match &request.command {
        Some(command_request::Command::Transaction(tx)) => assert_eq!(tx.commands.len(), 2),
        other => panic!("expected transaction, got {other:?}"),
    }
    assert!(request.route.is_some());
    let response = core.value_reply(
        request.callback_idx,
        Value::Array(vec![Value::Okay, Value::from("v")]),
    );
    core.send(&[response]).await;
    assert_eq!(
        transaction.await.expect("task"),
        Ok(Value::Array(vec![Value::Okay, Value::from("v")]))
    );

    let script = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .invoke_script(
                    "e0e1f9fabfc9d4800c877a703b823ac0578ff831",
                    vec![b"k".to_vec()],
                    vec![],
                    None,
                )
                .await
        }
    });
    let request = core.read_command().await;
    match &request.command {
        Some(command_request::Command::ScriptInvocation(invocation)) => {
            assert_eq!(invocation.keys, vec![b"k".to_vec()]);
        }
        other => panic!("expected script invocation, got {other:?}"),
    }
    let response = core.value_reply(request.callback_idx, Value::Int(3));
    core.send(&[response]).await;
    assert_eq!(script.await.expect("task"), Ok(Value::Int(3)));

    client.close(None).await;
}

#[tokio::test]
async fn test_cluster_scan_round() {
    let (client, mut core) = connect_pair(ClientConfig::cluster(vec![Default::default()])).await;

    let scan = tokio::spawn({
        let client = client.clone();
        async move {
            let options = ScanOptions {
                match_pattern: Some(b"user:*".to_vec()),
                ..ScanOptions::default()
            };
            client
                .cluster_scan(&ClusterScanCursor::initial(), &options)
                .await
        }
    });

    let request = core.read_command().await;
    match &request.command {
        Some(command_request::Command::ClusterScan(scan)) => {
            assert_eq!(scan.cursor, "0");
            assert_eq!(scan.match_pattern.as_deref(), Some(&b"user:*"[..]));
        }
        other => panic!("expected cluster scan, got {other:?}"),
    }
    let response = core.value_reply(
        request.callback_idx,
        Value::Array(vec![
            Value::from("finished"),
            Value::Array(vec![Value::from("user:1")]),
        ]),
    );
    core.send(&[response]).await;

    let (cursor, keys) = scan.await.expect("task").expect("scan");
    assert!(cursor.is_finished());
    assert_eq!(keys, vec![Value::from("user:1")]);
    client.close(None).await;
}

#[tokio::test]
async fn test_reset_password_clears_credentials() {
    let config = ClientConfig::default()
        .with_credentials(glide_ipc::ServerCredentials::new("old", None));
    let (client, mut core) = connect_pair(config).await;

    let reset = tokio::spawn({
        let client = client.clone();
        async move { client.reset_connection_password().await }
    });
    let request = core.read_command().await;
    match &request.command {
        Some(command_request::Command::UpdateConnectionPassword(update)) => {
            assert_eq!(update.password, None);
            assert!(!update.immediate_auth);
        }
        other => panic!("expected password update, got {other:?}"),
    }
    core.reply_ok(request.callback_idx).await;

    assert_eq!(reset.await.expect("task"), Ok(Value::Okay));
    assert_eq!(
        client.credentials().map(|c| c.password),
        Some(String::new())
    );
    client.close(None).await;
}
