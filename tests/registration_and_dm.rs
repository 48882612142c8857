//! End-to-end exercises of the gateway's event loop over real loopback
//! sockets, driven by an in-memory fake backend: registration and direct
//! conversation creation from an unsolicited client PRIVMSG.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use roomline_gateway::backend::{
    BackendClient, ChannelPayload, LocalAccount, MemberPayload, MessagePayload, Notification,
    NotificationKind, OrgPayload, PeerPayload,
};
use roomline_gateway::error::BackendError;
use roomline_gateway::state::GatewayState;

/// A scripted backend double for driving the gateway without a real
/// messaging-service subprocess. Mirrors the shape of the crate's own
/// internal `backend::fake::FakeBackend`, duplicated here since
/// integration tests can't reach into `#[cfg(test)]`-gated crate internals.
#[derive(Default)]
struct ScriptedBackend {
    orgs: std::sync::Mutex<Vec<OrgPayload>>,
    channels: std::sync::Mutex<Vec<(String, ChannelPayload)>>,
    members: std::sync::Mutex<Vec<(String, Vec<MemberPayload>)>>,
    peers: std::sync::Mutex<Vec<(String, PeerPayload)>>,
    sent: std::sync::Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl BackendClient for ScriptedBackend {
    async fn configure(&self, _host: &str, _port: u16, _db_dir: &str, _schema_dir: &str, _attachment_dir: &str, _use_tls: bool) -> Result<(), BackendError> {
        Ok(())
    }

    async fn enumerate_local_accounts(&self) -> Result<Vec<LocalAccount>, BackendError> {
        Ok(vec![LocalAccount { email_address: "alice@x".to_string() }])
    }

    async fn start_up(&self, _username: &str, _server_uri: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn enumerate_orgs(&self) -> Result<Vec<OrgPayload>, BackendError> {
        Ok(self.orgs.lock().unwrap().clone())
    }

    async fn enumerate_channels(&self, org_id: &str) -> Result<Vec<ChannelPayload>, BackendError> {
        Ok(self.channels.lock().unwrap().iter().filter(|(oid, _)| oid == org_id).map(|(_, c)| c.clone()).collect())
    }

    async fn enumerate_channel_members(&self, channel_id: &str) -> Result<Vec<MemberPayload>, BackendError> {
        Ok(self.members.lock().unwrap().iter().find(|(cid, _)| cid == channel_id).map(|(_, m)| m.clone()).unwrap_or_default())
    }

    async fn enumerate_messages(&self, _org_id: &str, _channel_id: &str) -> Result<Vec<MessagePayload>, BackendError> {
        Ok(vec![])
    }

    async fn get_channel(&self, channel_id: &str) -> Result<ChannelPayload, BackendError> {
        self.channels.lock().unwrap().iter().find(|(_, ch)| ch.id == channel_id).map(|(_, ch)| ch.clone()).ok_or_else(|| BackendError::new("no such channel"))
    }

    async fn get_peer(&self, username: &str) -> Result<PeerPayload, BackendError> {
        self.peers.lock().unwrap().iter().find(|(u, _)| u == username).map(|(_, p)| p.clone()).ok_or_else(|| BackendError::new("no such peer"))
    }

    async fn send_message(&self, org_id: &str, channel_id: &str, text: &str) -> Result<String, BackendError> {
        self.sent.lock().unwrap().push((org_id.to_string(), channel_id.to_string(), text.to_string()));
        Ok("M1".to_string())
    }

    async fn new_direct_conversation(&self, _org_id: &str, _account_id: &str) -> Result<String, BackendError> {
        Ok("C9".to_string())
    }

    async fn register_callback(&self, _kind: NotificationKind) -> Result<(), BackendError> {
        Ok(())
    }

    async fn unregister_callback(&self, _kind: NotificationKind) -> Result<(), BackendError> {
        Ok(())
    }

    async fn poll_notification(&self, _timeout: Duration) -> Result<Option<Notification>, BackendError> {
        Ok(None)
    }

    async fn terminate(&self) {}
}

async fn read_frame(stream: &mut TcpStream) -> String {
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut buf = vec![0u8; 16384];
    let mut total = String::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(50), stream.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => total.push_str(&String::from_utf8_lossy(&buf[..n])),
            Ok(Err(_)) => break,
        }
    }
    total
}

#[tokio::test]
async fn registration_over_real_socket_emits_welcome_sequence() {
    let backend: Arc<dyn BackendClient> = Arc::new(ScriptedBackend::default());
    let mut state = GatewayState::new(backend, "test.gw".to_string(), "alice@x".to_string(), false);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn(async move {
        roomline_gateway::event_loop::run(&mut state, vec![listener], shutdown_rx).await;
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"NICK foo\r\n").await.unwrap();
    client.write_all(b"USER foo 0 * :foo\r\n").await.unwrap();

    let frame = read_frame(&mut client).await;
    assert!(frame.contains("001 alice@x"), "{frame}");
    assert!(frame.contains("002 alice@x"), "{frame}");
    assert!(frame.contains("251 alice@x :There are 0 orgs and 0 channels"), "{frame}");
    assert!(frame.contains("376 alice@x :End of /MOTD command"), "{frame}");
    assert!(frame.contains("NICK :alice@x"), "{frame}");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn privmsg_to_unknown_member_creates_direct_conversation() {
    let scripted = Arc::new(ScriptedBackend::default());
    scripted.peers.lock().unwrap().push(("bob".to_string(), PeerPayload { account_id: "A2".to_string() }));
    let backend: Arc<dyn BackendClient> = scripted.clone();
    let mut state = GatewayState::new(backend, "test.gw".to_string(), "alice@x".to_string(), false);
    state.organizations.insert("O1".to_string(), "Acme".to_string());
    state.flow_account_id = "A1".to_string();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn(async move {
        roomline_gateway::event_loop::run(&mut state, vec![listener], shutdown_rx).await;
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"NICK foo\r\n").await.unwrap();
    client.write_all(b"USER foo 0 * :foo\r\n").await.unwrap();
    let _ = read_frame(&mut client).await;

    client.write_all(b"PRIVMSG bob(Acme) :hi\r\n").await.unwrap();
    let frame = read_frame(&mut client).await;
    assert!(!frame.contains("401"), "expected the DM to resolve, got: {frame}");

    let _ = shutdown_tx.send(());
    let _ = handle.await;

    let sent = scripted.sent.lock().unwrap();
    assert_eq!(sent.as_slice(), [("O1".to_string(), "C9".to_string(), "hi".to_string())]);
}

#[tokio::test]
async fn unregistered_client_is_restricted_to_registration_commands() {
    let backend: Arc<dyn BackendClient> = Arc::new(ScriptedBackend::default());
    let mut state = GatewayState::new(backend, "test.gw".to_string(), "alice@x".to_string(), false);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn(async move {
        roomline_gateway::event_loop::run(&mut state, vec![listener], shutdown_rx).await;
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"PRIVMSG #general :hi\r\n").await.unwrap();
    let frame = read_frame(&mut client).await;
    assert!(frame.is_empty(), "registration-state client should ignore non-registration commands, got: {frame}");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
