//! Production `BackendClient`: spawns the backend subprocess, reads its
//! stdout handshake line, then speaks JSON-RPC over loopback HTTP.
//!
//! Grounded on `flow/flow_api.py`'s `Flow` class: `_StartFlowAppGlue` spawns
//! the subprocess and reads one `{"token", "port"}` JSON line from stdout;
//! `_Run` POSTs `{"method", "params", "token"}` to `http://localhost:<port>/rpc`
//! and unwraps `{"result", "error"}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{BackendError, BackendInitError};

use super::{
    BackendClient, ChannelIdPayload, ChannelMemberPayload, ChannelPayload, LocalAccount,
    MessageNotificationPayload, MessagePayload, MemberPayload, Notification, NotificationKind, OrgPayload, PeerPayload,
};

#[derive(Debug, Deserialize)]
struct Handshake {
    token: String,
    port: String,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: [Value; 1],
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: String,
}

/// A drained event envelope, mirroring `notification.py`'s
/// `event["Type"]`/`event["Data"]` shape.
#[derive(Debug, Deserialize)]
struct NotificationEnvelope {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Data")]
    data: Value,
}

pub struct HttpBackendClient {
    // Held only to keep the subprocess alive for the gateway's lifetime;
    // dropping this kills the backend.
    _child: Child,
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpBackendClient {
    /// Launches `binary` and blocks until its handshake line is read.
    pub async fn spawn(binary: &str) -> Result<Self, BackendInitError> {
        let mut child = Command::new(binary)
            .arg("0")
            .stdout(std::process::Stdio::piped())
            .spawn()
            .map_err(BackendInitError::Spawn)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            BackendInitError::Handshake("backend subprocess has no stdout".to_string())
        })?;
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| BackendInitError::Handshake(e.to_string()))?;
        let handshake: Handshake = serde_json::from_str(line.trim())
            .map_err(|e| BackendInitError::Handshake(e.to_string()))?;
        let port: u16 = handshake
            .port
            .parse()
            .map_err(|_| BackendInitError::Handshake(format!("bad port: {}", handshake.port)))?;

        Ok(Self {
            _child: child,
            http: reqwest::Client::new(),
            base_url: format!("http://localhost:{}/rpc", port),
            token: handshake.token,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, BackendError> {
        let request = RpcRequest { method, params: [params], token: &self.token };
        debug!(method, "backend rpc request");
        let response = self
            .http
            .post(&self.base_url)
            .header("Content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::new(e.to_string()))?;
        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| BackendError::new(e.to_string()))?;
        debug!(method, error = %body.error, "backend rpc response");
        if !body.error.is_empty() {
            return Err(BackendError::new(body.error));
        }
        Ok(body.result)
    }

    async fn call_typed<T: for<'de> Deserialize<'de>>(&self, method: &str, params: Value) -> Result<T, BackendError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| BackendError::new(e.to_string()))
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn configure(
        &self,
        host: &str,
        port: u16,
        db_dir: &str,
        schema_dir: &str,
        attachment_dir: &str,
        use_tls: bool,
    ) -> Result<(), BackendError> {
        self.call(
            "Config",
            json!({
                "FlowServHost": host,
                "FlowServPort": port,
                "FlowLocalDatabaseDir": db_dir,
                "FlowLocalSchemaDir": schema_dir,
                "FlowAttachmentDir": attachment_dir,
                "FlowUseTLS": use_tls,
            }),
        )
        .await?;
        Ok(())
    }

    async fn enumerate_local_accounts(&self) -> Result<Vec<LocalAccount>, BackendError> {
        self.call_typed("EnumerateLocalAccounts", json!({})).await
    }

    async fn start_up(&self, username: &str, server_uri: &str) -> Result<(), BackendError> {
        self.call("StartUp", json!({ "Username": username, "ServerURI": server_uri })).await?;
        Ok(())
    }

    async fn enumerate_orgs(&self) -> Result<Vec<OrgPayload>, BackendError> {
        self.call_typed("EnumerateOrgs", json!({})).await
    }

    async fn enumerate_channels(&self, org_id: &str) -> Result<Vec<ChannelPayload>, BackendError> {
        self.call_typed("EnumerateChannels", json!({ "OrgID": org_id })).await
    }

    async fn enumerate_channel_members(&self, channel_id: &str) -> Result<Vec<MemberPayload>, BackendError> {
        self.call_typed("EnumerateChannelMembers", json!({ "ChannelID": channel_id })).await
    }

    async fn enumerate_messages(&self, org_id: &str, channel_id: &str) -> Result<Vec<MessagePayload>, BackendError> {
        self.call_typed(
            "EnumerateMessages",
            json!({ "OrgID": org_id, "ChannelID": channel_id, "Filters": {} }),
        )
        .await
    }

    async fn get_channel(&self, channel_id: &str) -> Result<ChannelPayload, BackendError> {
        self.call_typed("GetChannel", json!({ "ChannelID": channel_id })).await
    }

    async fn get_peer(&self, username: &str) -> Result<PeerPayload, BackendError> {
        self.call_typed("GetPeer", json!({ "Username": username })).await
    }

    async fn send_message(&self, org_id: &str, channel_id: &str, text: &str) -> Result<String, BackendError> {
        self.call_typed(
            "SendMessage",
            json!({ "OrgID": org_id, "ChannelID": channel_id, "Text": text, "OtherData": {} }),
        )
        .await
    }

    async fn new_direct_conversation(&self, org_id: &str, account_id: &str) -> Result<String, BackendError> {
        self.call_typed("NewDirectConversation", json!({ "OrgID": org_id, "MemberID": account_id })).await
    }

    async fn register_callback(&self, kind: NotificationKind) -> Result<(), BackendError> {
        self.call("RegisterCallback", json!({ "Kind": kind.as_str() })).await?;
        Ok(())
    }

    async fn unregister_callback(&self, kind: NotificationKind) -> Result<(), BackendError> {
        self.call("UnregisterCallback", json!({ "Kind": kind.as_str() })).await?;
        Ok(())
    }

    async fn poll_notification(&self, timeout: Duration) -> Result<Option<Notification>, BackendError> {
        let value = self
            .call("ProcessOneNotification", json!({ "TimeoutSeconds": timeout.as_secs_f64() }))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let envelope: NotificationEnvelope = serde_json::from_value(value).map_err(|e| BackendError::new(e.to_string()))?;
        let notification = match envelope.kind.as_str() {
            "org" => Notification::Org(serde_json::from_value(envelope.data).map_err(|e| BackendError::new(e.to_string()))?),
            "channel" => {
                let ids: Vec<ChannelIdPayload> =
                    serde_json::from_value(envelope.data).map_err(|e| BackendError::new(e.to_string()))?;
                Notification::Channel(ids)
            }
            "message" => {
                let payload: MessageNotificationPayload =
                    serde_json::from_value(envelope.data).map_err(|e| BackendError::new(e.to_string()))?;
                Notification::Message(payload)
            }
            "channel-member-event" => {
                let pairs: Vec<ChannelMemberPayload> =
                    serde_json::from_value(envelope.data).map_err(|e| BackendError::new(e.to_string()))?;
                Notification::ChannelMember(pairs)
            }
            other => {
                debug!(kind = other, "notification of unsupported type dropped");
                return Ok(None);
            }
        };
        Ok(Some(notification))
    }

    async fn terminate(&self) {
        let _ = self.call("Terminate", json!({})).await;
    }
}
