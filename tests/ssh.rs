// ABOUTME: Integration tests for the russh-backed transport.
// ABOUTME: Runs against local sockets that refuse or abort the SSH handshake.

mod support;

use herd::engine::{RunConfig, Runner};
use herd::ssh::{Error, HostKeyPolicy, SshConfig, SshTransport};
use herd::transport::Transport;
use herd::types::{Job, Outcome, Target};
use std::time::Duration;
use tokio::net::TcpListener;

/// A local port with nothing listening on it.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Test: connect to a port nobody listens on.
/// Expected: a Connection error naming the address.
#[tokio::test]
async fn refused_connection_is_a_connection_error() {
    let port = closed_port().await;
    let transport = SshTransport::new(SshConfig::default());
    let target = Target::new("127.0.0.1", "root").port(port);

    let err = transport.connect(&target).await.unwrap_err();
    match err {
        Error::Connection(reason) => assert!(reason.contains(&format!("127.0.0.1:{port}"))),
        other => panic!("expected connection error, got {other:?}"),
    }
}

/// Test: the peer accepts TCP and then hangs up without speaking SSH.
/// Expected: a Connection error from the handshake.
#[tokio::test]
async fn aborted_handshake_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });

    let transport = SshTransport::new(SshConfig::default().host_key_policy(HostKeyPolicy::Strict));
    let target = Target::new("127.0.0.1", "root").port(port);

    let err = transport.connect(&target).await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "got {err:?}");
}

/// Test: a full run where every host refuses the connection.
/// Expected: every host reports ConnectFailed.
#[tokio::test]
async fn runner_reports_refused_hosts() {
    support::init_tracing();
    let port = closed_port().await;
    let runner = Runner::new(
        SshTransport::default(),
        RunConfig::default().connect_timeout(Duration::from_secs(5)),
    );
    let targets = vec![
        Target::new("127.0.0.1", "root").port(port),
        Target::new("127.0.0.1", "deploy").port(port),
    ];

    let report = runner.run(targets, Job::command("true")).await.unwrap();

    assert_eq!(report.len(), 2);
    assert!(
        report
            .iter()
            .all(|(_, outcome)| matches!(outcome, Outcome::ConnectFailed(_)))
    );
}

#[test]
fn host_key_policy_names() {
    let policy: HostKeyPolicy = serde_yaml::from_str("accept-any").unwrap();
    assert_eq!(policy, HostKeyPolicy::AcceptAny);
    assert!(serde_yaml::from_str::<HostKeyPolicy>("trust-everything").is_err());
}
