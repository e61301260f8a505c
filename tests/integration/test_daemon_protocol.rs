//! Integration Tests for the Daemon
//!
//! A daemon on a temporary socket driven through the client stub, with
//! scripted game servers behind it.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use mudprod::daemon::{Reply, Request};
use mudprod::{ConnectionState, Error, ErrorKind, SessionRegistry};
use test_utils::{create_test_config, MockMud, MudReply, TestDaemon};

fn connect(session: &str, port: u16) -> Request {
    Request::Connect {
        session: session.to_string(),
        host: "127.0.0.1".to_string(),
        port,
        login: None,
        prompt: None,
        auto_reconnect: None,
    }
}

fn send(session: &str, text: &str) -> Request {
    Request::Send {
        session: session.to_string(),
        text: text.to_string(),
        fast: false,
        timeout_ms: Some(2000),
    }
}

#[tokio::test]
async fn test_ping_and_empty_status() {
    let daemon = TestDaemon::start().await;
    assert!(daemon.client.is_running().await);
    assert!(daemon.client.status(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_connect_send_and_reuse() {
    let mud = MockMud::echo().await;
    let daemon = TestDaemon::start().await;

    match daemon.client.call(&connect("p1", mud.port())).await.unwrap() {
        Reply::Connected {
            state,
            reused,
            greeting,
            ..
        } => {
            assert_eq!(state, ConnectionState::Ready);
            assert!(!reused);
            assert_eq!(greeting.lines, vec!["Welcome!"]);
        }
        other => panic!("unexpected reply {:?}", other),
    }

    let response = daemon.client.send("p1", "hello", false).await.unwrap();
    assert!(response.prompt_detected);
    assert_eq!(response.lines, vec!["You say 'hello'"]);

    assert!(matches!(
        daemon.client.call(&connect("p1", mud.port())).await.unwrap(),
        Reply::Connected { reused: true, .. }
    ));
    assert_eq!(mud.connections(), 1);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let mud = MockMud::echo().await;
    let daemon = TestDaemon::start().await;
    daemon.client.call(&connect("p1", mud.port())).await.unwrap();
    daemon.client.call(&connect("p2", mud.port())).await.unwrap();

    let response = daemon.client.send("p1", "say hi", false).await.unwrap();
    assert!(response.contains("say hi"));

    let other = daemon.client.read("p2").await.unwrap();
    assert!(!other.contains("hi"));
    let other = daemon.client.peek("p2", Some(200)).await.unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
async fn test_concurrent_sessions_do_not_block_each_other() {
    let slow = MockMud::silent(b"> ").await;
    let fast = MockMud::echo().await;
    let daemon = TestDaemon::start().await;
    daemon.client.call(&connect("slow", slow.port())).await.unwrap();
    daemon.client.call(&connect("fast", fast.port())).await.unwrap();

    let waiting = {
        let client = daemon.client.clone();
        tokio::spawn(async move {
            client
                .call(&Request::Send {
                    session: "slow".into(),
                    text: "ponder".into(),
                    fast: false,
                    timeout_ms: Some(3000),
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    let response = daemon.client.send("fast", "look", false).await.unwrap();
    assert!(response.prompt_detected);
    assert!(started.elapsed() < Duration::from_secs(2));

    let status = daemon.client.status(Some("slow")).await.unwrap();
    assert_eq!(status[0].state, ConnectionState::Ready);

    assert!(waiting.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_batch_over_the_socket() {
    let mud = MockMud::echo().await;
    let daemon = TestDaemon::start().await;
    daemon.client.call(&connect("p1", mud.port())).await.unwrap();

    let reply = daemon
        .client
        .call(&Request::Batch {
            session: "p1".into(),
            commands: vec!["north".into(), "east".into()],
            fast: true,
            timeout_ms: None,
        })
        .await
        .unwrap();

    match reply {
        Reply::Batch { results, error, .. } => {
            assert!(error.is_none());
            let commands: Vec<&str> = results.iter().map(|r| r.command.as_str()).collect();
            assert_eq!(commands, vec!["north", "east"]);
            assert_eq!(results[0].response.lines, vec!["You say 'north'"]);
            assert_eq!(results[1].response.lines, vec!["You say 'east'"]);
        }
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test]
async fn test_partial_batch_over_the_socket() {
    let mud = MockMud::start(b"> ", |line| match line {
        "a" => MudReply::text("Answer A\n> "),
        "b" => MudReply::Close(Vec::new()),
        _ => MudReply::text("Ok.\n> "),
    })
    .await;
    let daemon = TestDaemon::start().await;
    let mut request = connect("p1", mud.port());
    if let Request::Connect { auto_reconnect, .. } = &mut request {
        *auto_reconnect = Some(false);
    }
    daemon.client.call(&request).await.unwrap();

    let reply = daemon
        .client
        .request(&Request::Batch {
            session: "p1".into(),
            commands: vec!["a".into(), "b".into(), "c".into()],
            fast: false,
            timeout_ms: Some(2000),
        })
        .await
        .unwrap();
    assert!(reply.is_failure());

    match reply {
        Reply::Batch { results, error, .. } => {
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].command, "a");
            assert_eq!(results[0].response.lines, vec!["Answer A"]);
            let failure = error.expect("the batch should report where it stopped");
            assert_eq!(failure.command, "b");
            assert_eq!(failure.kind, ErrorKind::ConnectionLost);
        }
        other => panic!("unexpected reply {:?}", other),
    }

    // Nothing completed: a plain error
    let reply = daemon
        .client
        .request(&Request::Batch {
            session: "p1".into(),
            commands: vec!["c".into()],
            fast: true,
            timeout_ms: None,
        })
        .await
        .unwrap();
    assert!(matches!(
        reply,
        Reply::Error {
            kind: ErrorKind::ConnectionLost,
            ..
        }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_connect_and_disconnect_leave_no_stray_socket() {
    let mud = MockMud::echo().await;
    let registry = Arc::new(SessionRegistry::new(&create_test_config()));

    for round in 0..20 {
        let config = registry.session_config("127.0.0.1", mud.port(), None, None, Some(false));
        let connecting = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.connect("p1", config).await })
        };
        if round % 2 == 1 {
            tokio::task::yield_now().await;
        }
        let disconnecting = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.disconnect("p1").await })
        };
        let _ = connecting.await.unwrap();
        let _ = disconnecting.await.unwrap();
    }

    let expected = match registry.status(Some("p1")).await {
        Ok(status) => usize::from(status[0].state == ConnectionState::Ready),
        Err(_) => 0,
    };
    assert!(
        mud.wait_for_open(expected, Duration::from_secs(5)).await,
        "{} connection(s) open, {} session(s) registered and ready",
        mud.open_connections(),
        expected
    );
}

#[tokio::test]
async fn test_unknown_session_is_reported() {
    let daemon = TestDaemon::start().await;

    let reply = daemon.client.request(&send("ghost", "look")).await.unwrap();
    assert!(matches!(
        reply,
        Reply::Error {
            kind: ErrorKind::UnknownSession,
            ..
        }
    ));

    match daemon.client.read("ghost").await {
        Err(Error::Remote { kind, .. }) => assert_eq!(kind, ErrorKind::UnknownSession),
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let daemon = TestDaemon::start().await;
    let reply = daemon.client.request(&connect("p1", port)).await.unwrap();
    assert!(matches!(
        reply,
        Reply::Error {
            kind: ErrorKind::ConnectError,
            ..
        }
    ));
    assert!(daemon.client.is_running().await, "one failed session never takes the daemon down");
}

#[tokio::test]
async fn test_trigger_admin() {
    let mud = MockMud::start(b"> ", |line| match line {
        "look" => MudReply::text("You are thirsty.\n> "),
        _ => MudReply::text("Ok.\n> "),
    })
    .await;
    let daemon = TestDaemon::start().await;
    daemon.client.call(&connect("p1", mud.port())).await.unwrap();

    daemon
        .client
        .call(&Request::TriggerAdd {
            session: "p1".into(),
            name: None,
            pattern: "thirsty".into(),
            command: "drink water".into(),
            cooldown_ms: None,
        })
        .await
        .unwrap();
    daemon
        .client
        .call(&Request::Repeat {
            session: "p1".into(),
            command: "kick".into(),
            pattern: None,
        })
        .await
        .unwrap();

    match daemon
        .client
        .call(&Request::Triggers {
            session: "p1".into(),
        })
        .await
        .unwrap()
    {
        Reply::Triggers {
            triggers, repeat, ..
        } => {
            assert_eq!(triggers.len(), 1);
            assert_eq!(triggers[0].name, "thirsty");
            assert_eq!(repeat.map(|r| r.command), Some("kick".to_string()));
        }
        other => panic!("unexpected reply {:?}", other),
    }

    daemon.client.send("p1", "look", false).await.unwrap();
    assert!(mud.wait_for_line("drink water", Duration::from_secs(3)).await);

    let reserved = daemon
        .client
        .request(&Request::TriggerAdd {
            session: "p1".into(),
            name: Some("repeat".into()),
            pattern: "x".into(),
            command: "y".into(),
            cooldown_ms: None,
        })
        .await
        .unwrap();
    assert!(matches!(reserved, Reply::Error { kind: ErrorKind::Trigger, .. }));

    let missing = daemon
        .client
        .request(&Request::TriggerRemove {
            session: "p1".into(),
            name: "nope".into(),
        })
        .await
        .unwrap();
    assert!(missing.is_error());

    daemon
        .client
        .call(&Request::TriggerClear {
            session: "p1".into(),
        })
        .await
        .unwrap();
    let status = daemon.client.status(Some("p1")).await.unwrap();
    assert_eq!(status[0].triggers, 1, "clearing keeps the repeat trigger");
}

#[tokio::test]
async fn test_malformed_request() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let daemon = TestDaemon::start().await;
    let stream = tokio::net::UnixStream::connect(&daemon.config.daemon.socket_path)
        .await
        .unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    writer.write_all(b"{\"command\":\"fly\"}\n{\"command\":\"ping\"}\n").await.unwrap();

    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert!(line.contains("\"protocol_error\""));

    line.clear();
    reader.read_line(&mut line).await.unwrap();
    assert!(line.contains("\"pong\""), "connection survives a bad request");
}

#[tokio::test]
async fn test_disconnect_removes_session() {
    let mud = MockMud::echo().await;
    let daemon = TestDaemon::start().await;
    daemon.client.call(&connect("p1", mud.port())).await.unwrap();

    daemon
        .client
        .call(&Request::Disconnect {
            session: "p1".into(),
        })
        .await
        .unwrap();

    assert!(daemon.client.status(None).await.unwrap().is_empty());
    assert!(matches!(
        daemon.client.status(Some("p1")).await,
        Err(Error::Remote {
            kind: ErrorKind::UnknownSession,
            ..
        })
    ));
}

#[tokio::test]
async fn test_stop_shuts_down_and_cleans_up() {
    let mud = MockMud::echo().await;
    let daemon = TestDaemon::start().await;
    daemon.client.call(&connect("p1", mud.port())).await.unwrap();

    daemon.client.stop().await.unwrap();
    let finished = tokio::time::timeout(Duration::from_secs(10), daemon.task)
        .await
        .expect("daemon should stop");
    assert!(finished.unwrap().is_ok());

    assert!(!daemon.config.daemon.socket_path.exists());
    assert!(!daemon.config.daemon.pid_path.exists());
}
