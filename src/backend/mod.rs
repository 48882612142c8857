//! Messaging-Service Client: the external contract the gateway depends on.
//!
//! `BackendClient` is the abstract surface the rest of the gateway talks to
//! — request/reply RPCs plus a polled notification stream. `http` supplies
//! the only production implementation (JSON-over-loopback-HTTP, matching
//! `flow/flow_api.py`'s `Flow` class); tests substitute an in-memory fake.

#[cfg(test)]
pub(crate) mod fake;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::BackendError;

/// One local account on this device, as returned by
/// `EnumerateLocalAccounts`.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalAccount {
    #[serde(rename = "EmailAddress")]
    pub email_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrgPayload {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelPayload {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Purpose")]
    pub purpose: String,
}

impl ChannelPayload {
    pub fn is_direct(&self) -> bool {
        self.purpose == "direct message"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberPayload {
    #[serde(rename = "AccountID")]
    pub account_id: String,
    #[serde(rename = "EmailAddress")]
    pub email_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    #[serde(rename = "SenderAccountID")]
    pub sender_account_id: String,
    #[serde(rename = "Text")]
    pub text: String,
    #[serde(rename = "CreationTime")]
    pub creation_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerPayload {
    #[serde(rename = "AccountID")]
    pub account_id: String,
}

/// `[{"ID": str, "OrgID": str}, …]` — a `channel` notification entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelIdPayload {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "OrgID")]
    pub org_id: String,
}

/// The `ChannelMessages` entries embedded in a `message` notification:
/// channel identity carried alongside its first message.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMessagePayload {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Purpose")]
    pub purpose: String,
}

impl ChannelMessagePayload {
    pub fn is_direct(&self) -> bool {
        self.purpose == "direct message"
    }
}

/// The `RegularMessages` entries of a `message` notification.
#[derive(Debug, Clone, Deserialize)]
pub struct RegularMessagePayload {
    #[serde(rename = "SenderAccountID")]
    pub sender_account_id: String,
    #[serde(rename = "ChannelID")]
    pub channel_id: String,
    #[serde(rename = "Text")]
    pub text: String,
    #[serde(rename = "CreationTime")]
    pub creation_time: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MessageNotificationPayload {
    #[serde(rename = "ChannelMessages", default)]
    pub channel_messages: Vec<ChannelMessagePayload>,
    #[serde(rename = "RegularMessages", default)]
    pub regular_messages: Vec<RegularMessagePayload>,
}

/// `[{"ChannelID": str, "AccountID": str}, …]` — the richer pair-form of
/// channel-member-event payload, naming exactly which member joined which
/// channel rather than a bare list of ids.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMemberPayload {
    #[serde(rename = "ChannelID")]
    pub channel_id: String,
    #[serde(rename = "AccountID")]
    pub account_id: String,
}

/// One drained backend event, tagged by kind. The Dispatcher
/// (`crate::dispatch`) is a match over this.
#[derive(Debug, Clone)]
pub enum Notification {
    Org(Vec<OrgPayload>),
    Channel(Vec<ChannelIdPayload>),
    Message(MessageNotificationPayload),
    ChannelMember(Vec<ChannelMemberPayload>),
}

/// The notification kinds `RegisterCallback`/`UnregisterCallback` subscribe
/// to or drop — one per `Notification` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Org,
    Channel,
    Message,
    ChannelMember,
}

impl NotificationKind {
    /// The wire string used as both the `RegisterCallback` kind argument
    /// and the drained notification envelope's `Type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Org => "org",
            Self::Channel => "channel",
            Self::Message => "message",
            Self::ChannelMember => "channel-member-event",
        }
    }
}

/// Typed wrapper over the messaging-service backend RPC. Every call may
/// fail with `BackendError`; failures are non-fatal except during startup,
/// where the caller escalates to `BackendInitError`.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// One-time bootstrap binding the client to a backend host/port and
    /// local storage directories.
    #[allow(clippy::too_many_arguments)]
    async fn configure(
        &self,
        host: &str,
        port: u16,
        db_dir: &str,
        schema_dir: &str,
        attachment_dir: &str,
        use_tls: bool,
    ) -> Result<(), BackendError>;
    async fn enumerate_local_accounts(&self) -> Result<Vec<LocalAccount>, BackendError>;
    async fn start_up(&self, username: &str, server_uri: &str) -> Result<(), BackendError>;
    async fn enumerate_orgs(&self) -> Result<Vec<OrgPayload>, BackendError>;
    async fn enumerate_channels(&self, org_id: &str) -> Result<Vec<ChannelPayload>, BackendError>;
    async fn enumerate_channel_members(&self, channel_id: &str) -> Result<Vec<MemberPayload>, BackendError>;
    async fn enumerate_messages(&self, org_id: &str, channel_id: &str) -> Result<Vec<MessagePayload>, BackendError>;
    /// Metadata refresh for a single channel.
    async fn get_channel(&self, channel_id: &str) -> Result<ChannelPayload, BackendError>;
    async fn get_peer(&self, username: &str) -> Result<PeerPayload, BackendError>;
    async fn send_message(&self, org_id: &str, channel_id: &str, text: &str) -> Result<String, BackendError>;
    async fn new_direct_conversation(&self, org_id: &str, account_id: &str) -> Result<String, BackendError>;
    /// Subscribes to one notification kind.
    async fn register_callback(&self, kind: NotificationKind) -> Result<(), BackendError>;
    /// Drops a prior subscription to one notification kind.
    async fn unregister_callback(&self, kind: NotificationKind) -> Result<(), BackendError>;
    /// Pumps one notification off the backend's queue, waiting up to
    /// `timeout`. Returns `Ok(None)` on timeout — the non-blocking
    /// replacement for the original's blocking `WaitForNotification`.
    async fn poll_notification(&self, timeout: Duration) -> Result<Option<Notification>, BackendError>;
    async fn terminate(&self);
}
