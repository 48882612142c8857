//! Gateway State: the process-wide singleton holding the domain model,
//! every connected client session, and the backend reference. All mutation
//! happens from the event loop — there is no `Arc`/`Mutex` anywhere in this
//! module, by construction: a single task owns this struct outright.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::backend::{BackendClient, ChannelPayload};
use crate::error::BackendError;
use crate::model::{Channel, ChannelKind, Member, PendingChannel};
use crate::naming;
use crate::session::{ClientSession, SessionId};

pub struct GatewayState {
    pub organizations: HashMap<String, String>,
    pub channels: HashMap<String, Channel>,
    pub pending_channels: HashMap<String, PendingChannel>,
    pub clients: HashMap<SessionId, ClientSession>,
    pub flow_username: String,
    pub flow_account_id: String,
    pub gateway_name: String,
    pub show_timestamps: bool,
    pub backend: Arc<dyn BackendClient>,
    next_session_id: u64,
}

impl GatewayState {
    pub fn new(backend: Arc<dyn BackendClient>, gateway_name: String, flow_username: String, show_timestamps: bool) -> Self {
        Self {
            organizations: HashMap::new(),
            channels: HashMap::new(),
            pending_channels: HashMap::new(),
            clients: HashMap::new(),
            flow_username,
            flow_account_id: String::new(),
            gateway_name,
            show_timestamps,
            backend,
            next_session_id: 0,
        }
    }

    pub fn next_session_id(&mut self) -> SessionId {
        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;
        id
    }

    /// Sends `frame` (without the trailing `\r\n`) to every connected
    /// client's write buffer.
    pub fn notify_clients(&mut self, frame: &str) {
        for client in self.clients.values_mut() {
            client.message(frame);
        }
    }

    /// `AddChannel`: sets `NameCollides` by scanning existing channels for
    /// the computed pre-collision name, then inserts.
    pub fn add_channel(&mut self, mut channel: Channel) -> String {
        if let ChannelKind::Regular { .. } = channel.kind {
            let base = channel.base_room_name();
            let collides = base
                .as_ref()
                .is_some_and(|base| self.channels.values().any(|existing| existing.base_room_name().as_ref() == Some(base)));
            channel.set_name_collides(collides);
        }
        let channel_id = channel.channel_id.clone();
        self.channels.insert(channel_id.clone(), channel);
        channel_id
    }

    /// `GetOrgIDFromName`: linear scan, first match wins.
    pub fn get_org_id_from_name(&self, org_name: &str) -> Option<String> {
        self.organizations.iter().find(|(_, name)| name.as_str() == org_name).map(|(id, _)| id.clone())
    }

    /// `GetMemberByIRCNickname`: linear scan over all channels' members.
    pub fn get_member_by_irc_nickname(&self, nickname: &str) -> Option<&Member> {
        self.channels.values().find_map(|ch| ch.member_by_nickname(nickname))
    }

    /// During member enumeration, records `AccountID` as `flow_account_id`
    /// the first time a member's username matches the local identity.
    fn resolve_local_account_id(&mut self, username: &str, account_id: &str) {
        if self.flow_account_id.is_empty() && username == self.flow_username {
            self.flow_account_id = account_id.to_string();
        }
    }

    /// Enumerates and attaches members for a freshly-created channel,
    /// resolving the local account id along the way. Public within the
    /// crate so the dispatcher can reuse it for channels materialized from
    /// notifications rather than from `LoadOrgsAndChannels`.
    pub(crate) async fn populate_members(&mut self, channel_id: &str, org_name: &str) -> Result<(), BackendError> {
        let members = self.backend.enumerate_channel_members(channel_id).await?;
        for member in members {
            self.resolve_local_account_id(&member.email_address, &member.account_id);
            if let Some(channel) = self.channels.get_mut(channel_id) {
                channel.add_member(Member::new(member.email_address, member.account_id, org_name.to_string()));
            }
        }
        Ok(())
    }

    fn channel_payload_into_channel(channel_id: String, payload: &ChannelPayload, org_id: &str, org_name: &str) -> Channel {
        if payload.is_direct() {
            Channel::new_direct(channel_id, org_id.to_string(), org_name.to_string(), false)
        } else {
            Channel::new_regular(channel_id, org_id.to_string(), org_name.to_string(), payload.name.clone())
        }
    }

    /// `GetChannels`: loads every channel of one org, returning the
    /// `ChannelID`s of the channels it newly added (for join-command
    /// emission). Channels already present in `channels` are left untouched
    /// — re-running this for an org whose notification repeats must not
    /// clobber already-populated members or re-emit joins for channels the
    /// clients already know about.
    pub async fn load_channels_for_org(&mut self, org_id: &str, org_name: &str) -> Result<Vec<String>, BackendError> {
        let channels = self.backend.enumerate_channels(org_id).await?;
        let mut added = Vec::new();
        for payload in &channels {
            if self.channels.contains_key(&payload.id) {
                continue;
            }
            let channel = Self::channel_payload_into_channel(payload.id.clone(), payload, org_id, org_name);
            let channel_id = self.add_channel(channel);
            if let Err(err) = self.populate_members(&channel_id, org_name).await {
                debug!(%err, channel_id, "enumerate_channel_members failed while loading org channels");
            }
            added.push(channel_id);
        }
        Ok(added)
    }

    /// `LoadOrgsAndChannels`: full reload, clearing and rebuilding
    /// `organizations` and `channels` from scratch.
    pub async fn load_orgs_and_channels(&mut self) -> Result<(), BackendError> {
        self.organizations.clear();
        self.channels.clear();
        let orgs = self.backend.enumerate_orgs().await?;
        for org in orgs {
            self.organizations.insert(org.id.clone(), org.name.clone());
            self.load_channels_for_org(&org.id, &org.name).await?;
        }
        Ok(())
    }

    /// `CreateDirectChannel`: asks the backend for a new direct
    /// conversation, then constructs and inserts the channel locally with
    /// `created_in_session = true`.
    pub async fn create_direct_channel(
        &mut self,
        account_id: &str,
        username: &str,
        org_id: &str,
        org_name: &str,
    ) -> Result<String, BackendError> {
        let channel_id = self.backend.new_direct_conversation(org_id, account_id).await?;
        let mut channel = Channel::new_direct(channel_id.clone(), org_id.to_string(), org_name.to_string(), true);
        channel.add_member(Member::new(self.flow_username.clone(), self.flow_account_id.clone(), org_name.to_string()));
        channel.add_member(Member::new(username.to_string(), account_id.to_string(), org_name.to_string()));
        self.add_channel(channel);
        Ok(channel_id)
    }

    /// Resolves a `<user>(<org>)` PRIVMSG/NOTICE target into a known member
    /// or direct-channel candidate. Mirrors `send_to_member` in
    /// `irc_client.py`.
    pub fn parse_and_lookup_target(&self, target: &str) -> Option<(&str, &str)> {
        naming::parse_member_target(target)
    }

    pub fn channel_by_room_name(&self, room_name: &str) -> Option<&Channel> {
        self.channels.values().find(|ch| ch.room_name(&self.flow_account_id) == room_name)
    }
}
