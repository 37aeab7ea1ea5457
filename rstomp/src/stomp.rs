//! Protocol engine: per-frame semantics on top of the session state and
//! the shared registry.

use bytestring::ByteString;
use tokio::io::{AsyncRead, AsyncWrite};

use rstomp_codec::{Command, Frame};
use rstomp_net::FrameStream;

use crate::registry::AuthOutcome;
use crate::session::SessionState;
use crate::types::{Destination, Login, SubscriptionId};
use crate::Result;

/// Protocol version answered in CONNECTED frames.
pub const VERSION: &str = "1.2";

enum Outcome {
    /// Processed; nothing beyond the receipt policy to emit.
    Done,
    /// Processed; answer with this frame before any receipt.
    Reply(Frame),
    /// Protocol violation: ERROR, clear state, terminate.
    Violation(String),
}

/// Applies one inbound frame to the session.
///
/// Any frame carrying a `receipt` header is answered with a RECEIPT
/// echoing it once all other effects are done; an ERROR response subsumes
/// the receipt.
pub(crate) async fn process_frame<Io>(
    state: &mut SessionState,
    sink: &mut FrameStream<Io>,
    frame: Frame,
) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    log::debug!("{:?} process {}", state.id, frame.command());
    let receipt = frame.header("receipt").map(str::to_owned);

    let outcome = match frame.command() {
        Command::Connect => connect(state, &frame),
        Command::Send => send(state, &frame),
        Command::Subscribe => subscribe(state, &frame),
        Command::Unsubscribe => unsubscribe(state, &frame),
        Command::Disconnect => disconnect(state, &frame),
        Command::Connected | Command::Message | Command::Receipt | Command::Error => {
            Outcome::Violation(format!("unexpected {} frame", frame.command()))
        }
    };

    match outcome {
        Outcome::Done => {}
        Outcome::Reply(reply) => sink.send(reply).await?,
        Outcome::Violation(message) => return fail(state, sink, receipt, message).await,
    }

    if let Some(receipt) = receipt {
        let frame = Frame::new(Command::Receipt, vec![("receipt".to_owned(), receipt)], String::new());
        sink.send(frame).await?;
    }
    Ok(())
}

/// Answers with a single ERROR frame, clears the connection's registry
/// state and flags the session for termination. The sole path by which
/// bad input ends a connection.
pub(crate) async fn fail<Io>(
    state: &mut SessionState,
    sink: &mut FrameStream<Io>,
    receipt: Option<String>,
    message: String,
) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    log::info!("{:?} protocol error: {}", state.id, message);
    let mut headers = Vec::new();
    if let Some(receipt) = receipt {
        headers.push(("receipt".to_owned(), receipt));
    }
    headers.push(("message".to_owned(), message));
    sink.send(Frame::new(Command::Error, headers, String::new())).await?;

    state.scx.registry.deregister(state.id.conn_id);
    state.login = None;
    state.terminated = true;
    Ok(())
}

fn connect(state: &mut SessionState, frame: &Frame) -> Outcome {
    if state.login.is_some() {
        return Outcome::Violation("already connected".into());
    }
    let login = Login::from(frame.header("login").unwrap_or_default());
    let passcode = ByteString::from(frame.header("passcode").unwrap_or_default());

    match state.scx.registry.authenticate(state.id.conn_id, login.clone(), passcode) {
        AuthOutcome::Success { new_account } => {
            log::info!(
                "{:?} login {:?} authenticated{}",
                state.id,
                login,
                if new_account { ", new account" } else { "" }
            );
            state.login = Some(login);
            Outcome::Reply(Frame::new(
                Command::Connected,
                vec![("version".to_owned(), VERSION.to_owned())],
                String::new(),
            ))
        }
        AuthOutcome::AlreadyLoggedIn => Outcome::Violation("already logged in".into()),
        AuthOutcome::WrongPasscode => Outcome::Violation("wrong password".into()),
    }
}

fn send(state: &mut SessionState, frame: &Frame) -> Outcome {
    if state.login.is_none() {
        return Outcome::Violation("not connected".into());
    }
    let destination = match frame.header("destination") {
        Some(d) if !d.is_empty() => Destination::from(d),
        _ => return Outcome::Violation("missing destination header".into()),
    };
    if state.scx.registry.subscription_id(state.id.conn_id, &destination).is_none() {
        return Outcome::Violation(format!("not subscribed to {destination}"));
    }

    // snapshot-and-dispatch; every recipient gets its own message id
    let scx = state.scx.clone();
    let body = frame.body();
    let res = state.scx.registry.fanout(&destination, |_, subscription_id| {
        Frame::new(
            Command::Message,
            vec![
                ("subscription".to_owned(), subscription_id.to_string()),
                ("message-id".to_owned(), scx.next_message_id().to_string()),
                ("destination".to_owned(), destination.to_string()),
            ],
            body.to_owned(),
        )
    });
    if let Err(errs) = res {
        for (to, reason) in errs {
            log::warn!(
                "{:?} deliver to {} failed, destination: {:?}, reason: {}",
                state.id,
                to,
                destination,
                reason
            );
        }
    }
    Outcome::Done
}

fn subscribe(state: &mut SessionState, frame: &Frame) -> Outcome {
    if state.login.is_none() {
        return Outcome::Violation("not connected".into());
    }
    let destination = match frame.header("destination") {
        Some(d) if !d.is_empty() => Destination::from(d),
        _ => return Outcome::Violation("missing destination header".into()),
    };
    let subscription_id = match frame.header("id") {
        Some(v) if !v.is_empty() => SubscriptionId::from(v),
        _ => return Outcome::Violation("missing id header".into()),
    };
    log::debug!("{:?} subscribe {:?}, id: {:?}", state.id, destination, subscription_id);
    state.scx.registry.subscribe(state.id.conn_id, destination, subscription_id);
    Outcome::Done
}

fn unsubscribe(state: &mut SessionState, frame: &Frame) -> Outcome {
    let subscription_id = match frame.header("id") {
        Some(v) if !v.is_empty() => v,
        _ => return Outcome::Done,
    };
    let Some(destination) = state.scx.registry.destination_for(state.id.conn_id, subscription_id) else {
        return Outcome::Violation(format!("no subscription with id {subscription_id:?}"));
    };
    log::debug!("{:?} unsubscribe {:?}, id: {:?}", state.id, destination, subscription_id);
    state.scx.registry.unsubscribe(state.id.conn_id, &destination);
    Outcome::Done
}

fn disconnect(state: &mut SessionState, frame: &Frame) -> Outcome {
    if frame.header("receipt").is_none() {
        return Outcome::Violation("missing receipt header".into());
    }
    log::debug!("{:?} disconnect", state.id);
    state.scx.registry.deauthenticate(state.id.conn_id);
    state.login = None;
    state.terminated = true;
    Outcome::Done
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Arc;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;
    use tokio_util::codec::Framed;

    use rstomp_codec::Codec;
    use rstomp_net::Builder;

    use super::*;
    use crate::context::ServerContext;
    use crate::types::Id;

    type Client = Framed<DuplexStream, Codec>;

    fn frame(command: Command, headers: &[(&str, &str)], body: &str) -> Frame {
        Frame::new(
            command,
            headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            body.to_owned(),
        )
    }

    /// One in-memory connection driven by a full session task.
    fn spawn_session(scx: &ServerContext) -> (Client, JoinHandle<crate::Result<()>>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let conn_id = scx.next_conn_id();
        let remote_addr: SocketAddr = (Ipv4Addr::LOCALHOST, 40_000 + conn_id as u16).into();
        let state = SessionState::new(scx.clone(), Id::new(conn_id, Some(remote_addr)));
        let sink = FrameStream::new(server_io, remote_addr, Arc::new(Builder::new()));
        let handle = tokio::spawn(state.run(sink));
        (Framed::new(client_io, Codec::default()), handle)
    }

    async fn recv(client: &mut Client) -> Frame {
        tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("recv timeout")
            .expect("stream closed")
            .expect("decode error")
    }

    async fn recv_closed(client: &mut Client) {
        let next = tokio::time::timeout(Duration::from_secs(5), client.next()).await.expect("recv timeout");
        assert!(next.is_none(), "expected closed stream, got {next:?}");
    }

    async fn connect(client: &mut Client, login: &str, passcode: &str) -> Frame {
        client
            .send(frame(Command::Connect, &[("login", login), ("passcode", passcode)], ""))
            .await
            .unwrap();
        recv(client).await
    }

    async fn subscribe(client: &mut Client, destination: &str, id: &str) {
        client
            .send(frame(Command::Subscribe, &[("destination", destination), ("id", id)], ""))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_ack_carries_version() {
        let scx = ServerContext::new();
        let (mut client, _handle) = spawn_session(&scx);

        let ack = connect(&mut client, "alice", "secret").await;
        assert_eq!(ack.command(), Command::Connected);
        assert_eq!(ack.header("version"), Some(VERSION));
    }

    #[tokio::test]
    async fn test_receipt_is_echoed_after_effects() {
        let scx = ServerContext::new();
        let (mut client, _handle) = spawn_session(&scx);
        connect(&mut client, "alice", "secret").await;

        client
            .send(frame(
                Command::Subscribe,
                &[("destination", "/topic/a"), ("id", "s-1"), ("receipt", "r-42")],
                "",
            ))
            .await
            .unwrap();
        let receipt = recv(&mut client).await;
        assert_eq!(receipt.command(), Command::Receipt);
        assert_eq!(receipt.header("receipt"), Some("r-42"));
        // the subscription really was registered before the receipt
        assert_eq!(scx.registry.subscription_id(1, "/topic/a"), Some("s-1".into()));
    }

    #[tokio::test]
    async fn test_double_connect_is_rejected() {
        let scx = ServerContext::new();
        let (mut client, _handle) = spawn_session(&scx);
        connect(&mut client, "alice", "secret").await;

        let err = connect(&mut client, "alice", "secret").await;
        assert_eq!(err.command(), Command::Error);
        assert_eq!(err.header("message"), Some("already connected"));
        recv_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_single_session_per_login() {
        let scx = ServerContext::new();
        let (mut first, _h1) = spawn_session(&scx);
        assert_eq!(connect(&mut first, "eve", "pw").await.command(), Command::Connected);

        // same credentials while the first session lives
        let (mut second, _h2) = spawn_session(&scx);
        let err = connect(&mut second, "eve", "pw").await;
        assert_eq!(err.command(), Command::Error);
        assert_eq!(err.header("message"), Some("already logged in"));
        recv_closed(&mut second).await;

        // wrong passcode is its own failure
        let (mut third, _h3) = spawn_session(&scx);
        let err = connect(&mut third, "eve", "nope").await;
        assert_eq!(err.header("message"), Some("wrong password"));

        // after DISCONNECT the login is free again
        first.send(frame(Command::Disconnect, &[("receipt", "bye")], "")).await.unwrap();
        assert_eq!(recv(&mut first).await.command(), Command::Receipt);
        recv_closed(&mut first).await;

        let (mut fourth, _h4) = spawn_session(&scx);
        assert_eq!(connect(&mut fourth, "eve", "pw").await.command(), Command::Connected);
    }

    #[tokio::test]
    async fn test_fanout_isolation() {
        let scx = ServerContext::new();
        let (mut a, _ha) = spawn_session(&scx);
        let (mut b, _hb) = spawn_session(&scx);
        connect(&mut a, "alice", "pw").await;
        connect(&mut b, "bob", "pw").await;

        // receipt round-trips pin both subscriptions down before the publish
        a.send(frame(Command::Subscribe, &[("destination", "/topic/x"), ("id", "s-a"), ("receipt", "r-a")], ""))
            .await
            .unwrap();
        assert_eq!(recv(&mut a).await.command(), Command::Receipt);
        b.send(frame(Command::Subscribe, &[("destination", "/topic/x"), ("id", "s-b"), ("receipt", "r-b")], ""))
            .await
            .unwrap();
        assert_eq!(recv(&mut b).await.command(), Command::Receipt);

        a.send(frame(Command::Send, &[("destination", "/topic/x")], "hello")).await.unwrap();

        let to_a = recv(&mut a).await;
        let to_b = recv(&mut b).await;
        for f in [&to_a, &to_b] {
            assert_eq!(f.command(), Command::Message);
            assert_eq!(f.header("destination"), Some("/topic/x"));
            assert_eq!(f.body(), "hello");
        }
        // each recipient is tagged with its own subscription id
        assert_eq!(to_a.header("subscription"), Some("s-a"));
        assert_eq!(to_b.header("subscription"), Some("s-b"));

        // distinct, valid message ids from the shared allocator
        let id_a: u64 = to_a.header("message-id").unwrap().parse().unwrap();
        let id_b: u64 = to_b.header("message-id").unwrap().parse().unwrap();
        assert_ne!(id_a, id_b);
    }

    #[tokio::test]
    async fn test_unsubscribed_send_is_rejected() {
        let scx = ServerContext::new();
        let (mut bystander, _hb) = spawn_session(&scx);
        connect(&mut bystander, "bob", "pw").await;
        subscribe(&mut bystander, "/topic/x", "s-b").await;

        let (mut a, _ha) = spawn_session(&scx);
        connect(&mut a, "alice", "pw").await;
        a.send(frame(Command::Send, &[("destination", "/topic/x")], "boo")).await.unwrap();

        let err = recv(&mut a).await;
        assert_eq!(err.command(), Command::Error);
        assert_eq!(err.header("message"), Some("not subscribed to /topic/x"));
        recv_closed(&mut a).await;

        // nobody got a MESSAGE out of the rejected SEND
        bystander.send(frame(Command::Disconnect, &[("receipt", "bye")], "")).await.unwrap();
        let next = recv(&mut bystander).await;
        assert_eq!(next.command(), Command::Receipt);
    }

    #[tokio::test]
    async fn test_send_requires_destination_header() {
        let scx = ServerContext::new();
        let (mut client, _handle) = spawn_session(&scx);
        connect(&mut client, "alice", "pw").await;

        client.send(frame(Command::Send, &[], "orphan")).await.unwrap();
        let err = recv(&mut client).await;
        assert_eq!(err.command(), Command::Error);
        assert_eq!(err.header("message"), Some("missing destination header"));
        recv_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_unauthenticated_send_is_rejected() {
        let scx = ServerContext::new();
        let (mut client, _handle) = spawn_session(&scx);

        client.send(frame(Command::Send, &[("destination", "/d")], "hi")).await.unwrap();
        let err = recv(&mut client).await;
        assert_eq!(err.command(), Command::Error);
        assert_eq!(err.header("message"), Some("not connected"));
        recv_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_unsubscribe_without_id_is_ignored() {
        let scx = ServerContext::new();
        let (mut client, _handle) = spawn_session(&scx);
        connect(&mut client, "alice", "pw").await;
        subscribe(&mut client, "/d", "s-1").await;

        client.send(frame(Command::Unsubscribe, &[], "")).await.unwrap();

        // the session is still alive and the subscription untouched
        client.send(frame(Command::Send, &[("destination", "/d"), ("receipt", "r-1")], "m")).await.unwrap();
        let mut commands = vec![recv(&mut client).await.command(), recv(&mut client).await.command()];
        commands.sort_by_key(|c| c.as_str());
        assert_eq!(commands, vec![Command::Message, Command::Receipt]);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_id_is_an_error() {
        let scx = ServerContext::new();
        let (mut client, _handle) = spawn_session(&scx);
        connect(&mut client, "alice", "pw").await;

        client.send(frame(Command::Unsubscribe, &[("id", "s-9")], "")).await.unwrap();
        let err = recv(&mut client).await;
        assert_eq!(err.command(), Command::Error);
        assert_eq!(err.header("message"), Some("no subscription with id \"s-9\""));
        recv_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let scx = ServerContext::new();
        let (mut client, _handle) = spawn_session(&scx);
        connect(&mut client, "alice", "pw").await;
        subscribe(&mut client, "/d", "s-1").await;

        client.send(frame(Command::Unsubscribe, &[("id", "s-1"), ("receipt", "r-1")], "")).await.unwrap();
        assert_eq!(recv(&mut client).await.command(), Command::Receipt);
        assert!(scx.registry.subscribers_of("/d").is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_requires_receipt() {
        let scx = ServerContext::new();
        let (mut client, _handle) = spawn_session(&scx);
        connect(&mut client, "alice", "pw").await;

        client.send(frame(Command::Disconnect, &[], "")).await.unwrap();
        let err = recv(&mut client).await;
        assert_eq!(err.command(), Command::Error);
        assert_eq!(err.header("message"), Some("missing receipt header"));
        recv_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_error_echoes_pending_receipt() {
        let scx = ServerContext::new();
        let (mut client, _handle) = spawn_session(&scx);
        connect(&mut client, "alice", "pw").await;

        client
            .send(frame(Command::Send, &[("destination", "/d"), ("receipt", "r-7")], "m"))
            .await
            .unwrap();
        let err = recv(&mut client).await;
        assert_eq!(err.command(), Command::Error);
        assert_eq!(err.header("receipt"), Some("r-7"));
        recv_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_server_frames_from_client_are_rejected() {
        let scx = ServerContext::new();
        let (mut client, _handle) = spawn_session(&scx);
        connect(&mut client, "alice", "pw").await;

        client.send(frame(Command::Message, &[("destination", "/d")], "fake")).await.unwrap();
        let err = recv(&mut client).await;
        assert_eq!(err.command(), Command::Error);
        assert_eq!(err.header("message"), Some("unexpected MESSAGE frame"));
        recv_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_session_cleanup_after_error() {
        let scx = ServerContext::new();
        let (mut client, handle) = spawn_session(&scx);
        connect(&mut client, "alice", "pw").await;
        subscribe(&mut client, "/d", "s-1").await;

        client.send(frame(Command::Send, &[("destination", "/other")], "m")).await.unwrap();
        assert_eq!(recv(&mut client).await.command(), Command::Error);
        recv_closed(&mut client).await;
        handle.await.unwrap().unwrap();

        assert!(scx.registry.subscribers_of("/d").is_empty());
        assert_eq!(scx.stats.connections.count(), 0);
    }
}
