//! In-memory `BackendClient` used by the core's own tests. Scripted with
//! plain fields rather than a mocking crate, in the style of a hand-rolled
//! `MockReader`-style test double.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    BackendClient, ChannelPayload, LocalAccount, MemberPayload, MessagePayload, Notification,
    NotificationKind, OrgPayload, PeerPayload,
};
use crate::error::BackendError;

#[derive(Default)]
pub struct FakeBackend {
    pub local_accounts: Vec<LocalAccount>,
    pub orgs: Vec<OrgPayload>,
    pub channels: Mutex<Vec<(String, ChannelPayload)>>,
    pub members: Mutex<Vec<(String, Vec<MemberPayload>)>>,
    pub messages: Mutex<Vec<(String, Vec<MessagePayload>)>>,
    pub peers: Mutex<Vec<(String, PeerPayload)>>,
    pub notifications: Mutex<Vec<Notification>>,
    pub sent: Mutex<Vec<(String, String, String)>>,
}

impl FakeBackend {
    pub fn push_notification(&self, notification: Notification) {
        self.notifications.lock().unwrap().insert(0, notification);
    }

    pub fn add_channel(&self, org_id: &str, channel: ChannelPayload) {
        self.channels.lock().unwrap().push((org_id.to_string(), channel));
    }

    pub fn set_members(&self, channel_id: &str, members: Vec<MemberPayload>) {
        self.members.lock().unwrap().push((channel_id.to_string(), members));
    }

    pub fn set_messages(&self, channel_id: &str, messages: Vec<MessagePayload>) {
        self.messages.lock().unwrap().push((channel_id.to_string(), messages));
    }

    pub fn set_peer(&self, username: &str, peer: PeerPayload) {
        self.peers.lock().unwrap().push((username.to_string(), peer));
    }

    pub fn sent_messages(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendClient for FakeBackend {
    async fn configure(&self, _host: &str, _port: u16, _db_dir: &str, _schema_dir: &str, _attachment_dir: &str, _use_tls: bool) -> Result<(), BackendError> {
        Ok(())
    }

    async fn enumerate_local_accounts(&self) -> Result<Vec<LocalAccount>, BackendError> {
        Ok(self.local_accounts.clone())
    }

    async fn start_up(&self, _username: &str, _server_uri: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn enumerate_orgs(&self) -> Result<Vec<OrgPayload>, BackendError> {
        Ok(self.orgs.clone())
    }

    async fn enumerate_channels(&self, org_id: &str) -> Result<Vec<ChannelPayload>, BackendError> {
        Ok(self.channels.lock().unwrap().iter().filter(|(oid, _)| oid == org_id).map(|(_, ch)| ch.clone()).collect())
    }

    async fn enumerate_channel_members(&self, channel_id: &str) -> Result<Vec<MemberPayload>, BackendError> {
        Ok(self.members.lock().unwrap().iter().find(|(cid, _)| cid == channel_id).map(|(_, m)| m.clone()).unwrap_or_default())
    }

    async fn enumerate_messages(&self, _org_id: &str, channel_id: &str) -> Result<Vec<MessagePayload>, BackendError> {
        Ok(self.messages.lock().unwrap().iter().find(|(cid, _)| cid == channel_id).map(|(_, m)| m.clone()).unwrap_or_default())
    }

    async fn get_channel(&self, channel_id: &str) -> Result<ChannelPayload, BackendError> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .find(|(_, ch)| ch.id == channel_id)
            .map(|(_, ch)| ch.clone())
            .ok_or_else(|| BackendError::new("no such channel"))
    }

    async fn get_peer(&self, username: &str) -> Result<PeerPayload, BackendError> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .find(|(u, _)| u == username)
            .map(|(_, p)| p.clone())
            .ok_or_else(|| BackendError::new("no such peer"))
    }

    async fn send_message(&self, org_id: &str, channel_id: &str, text: &str) -> Result<String, BackendError> {
        self.sent.lock().unwrap().push((org_id.to_string(), channel_id.to_string(), text.to_string()));
        Ok("M1".to_string())
    }

    async fn new_direct_conversation(&self, _org_id: &str, _account_id: &str) -> Result<String, BackendError> {
        Ok("C-DIRECT".to_string())
    }

    async fn register_callback(&self, _kind: NotificationKind) -> Result<(), BackendError> {
        Ok(())
    }

    async fn unregister_callback(&self, _kind: NotificationKind) -> Result<(), BackendError> {
        Ok(())
    }

    async fn poll_notification(&self, _timeout: Duration) -> Result<Option<Notification>, BackendError> {
        Ok(self.notifications.lock().unwrap().pop())
    }

    async fn terminate(&self) {}
}
