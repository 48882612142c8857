//! Notification Dispatcher: turns backend notifications into mutations of
//! `GatewayState` plus outbound lines to every connected client. Grounded on
//! `notification.py`'s `NotificationProcessor`.

use tracing::debug;

use crate::backend::{ChannelMessagePayload, Notification};
use crate::model::{Channel, Member, PendingChannel};
use crate::state::GatewayState;

pub async fn handle(state: &mut GatewayState, notification: Notification) {
    match notification {
        Notification::Org(orgs) => handle_org(state, orgs).await,
        Notification::Channel(ids) => handle_channel(state, ids),
        Notification::Message(payload) => handle_message(state, payload).await,
        Notification::ChannelMember(pairs) => handle_channel_member(state, pairs).await,
    }
}

/// `org` notification: upserts each org's name, then re-scopes
/// `LoadOrgsAndChannels` semantics to just that org (enumerate its channels,
/// fully populate) unconditionally — whether the org is brand new or
/// already known, since its channel list may have changed server-side.
/// `load_channels_for_org` already skips channels it has already populated,
/// so only genuinely new channels come back in `added` and get a JOIN.
async fn handle_org(state: &mut GatewayState, orgs: Vec<crate::backend::OrgPayload>) {
    for org in orgs {
        state.organizations.insert(org.id.clone(), org.name.clone());
        match state.load_channels_for_org(&org.id, &org.name).await {
            Ok(added) => {
                for channel_id in added {
                    emit_join_for_channel(state, &channel_id);
                }
            }
            Err(err) => debug!(%err, org_id = org.id, "enumerate_channels failed for org"),
        }
    }
}

/// `channel` notification: records a `PendingChannel` for each id not
/// already a known channel. No client-visible effect until the matching
/// `message` notification arrives with `ChannelMessages`.
fn handle_channel(state: &mut GatewayState, ids: Vec<crate::backend::ChannelIdPayload>) {
    for entry in ids {
        if state.channels.contains_key(&entry.id) {
            continue;
        }
        let Some(org_name) = state.organizations.get(&entry.org_id).cloned() else {
            debug!(channel_id = entry.id, org_id = entry.org_id, "channel notification for unknown org dropped");
            continue;
        };
        state.pending_channels.insert(
            entry.id.clone(),
            PendingChannel { channel_id: entry.id, org_id: entry.org_id, org_name },
        );
    }
}

async fn handle_message(state: &mut GatewayState, payload: crate::backend::MessageNotificationPayload) {
    for channel_message in payload.channel_messages {
        process_channel_message(state, channel_message).await;
    }
    for regular_message in payload.regular_messages {
        process_regular_message(state, regular_message).await;
    }
}

/// Promotes a `PendingChannel` (or an entirely unannounced id) to a real
/// `Channel` on first message, then emits JOIN to all clients. Drops
/// silently if the channel already exists — the pending/first-message race
/// is tolerated, not prevented.
async fn process_channel_message(state: &mut GatewayState, payload: ChannelMessagePayload) {
    if state.channels.contains_key(&payload.id) {
        return;
    }
    let pending = state.pending_channels.remove(&payload.id);
    let (org_id, org_name) = match pending {
        Some(p) => (p.org_id, p.org_name),
        None => {
            debug!(channel_id = payload.id, "message notification for channel with no prior channel notification");
            return;
        }
    };

    let channel = if payload.is_direct() {
        Channel::new_direct(payload.id.clone(), org_id, org_name.clone(), false)
    } else {
        Channel::new_regular(payload.id.clone(), org_id, org_name.clone(), payload.name.clone())
    };
    let channel_id = state.add_channel(channel);

    if let Err(err) = state.populate_members(&channel_id, &org_name).await {
        debug!(%err, channel_id, "enumerate_channel_members failed for new channel");
        return;
    }

    emit_join_for_channel(state, &channel_id);
}

/// Emits a JOIN for `channel_id` to every connected client, from every
/// member's hostmask in turn. Used both for newly-materialized channels and
/// for the org-load path.
fn emit_join_for_channel(state: &mut GatewayState, channel_id: &str) {
    let Some(channel) = state.channels.get(channel_id) else { return };
    let room_name = channel.room_name(&state.flow_account_id);
    let hostmasks: Vec<String> = channel.members.iter().map(|m| format!("{}!{}@{}", m.irc_nickname(), m.user, m.host)).collect();
    for hostmask in hostmasks {
        state.notify_clients(&format!(":{} JOIN :{}", hostmask, room_name));
    }
}

/// Emits a JOIN for a single member of `channel_id` to every connected
/// client. Used by the channel-member-event handler, which only ever
/// introduces one new member per entry.
fn emit_join_for_member(state: &mut GatewayState, channel_id: &str, account_id: &str) {
    let Some(channel) = state.channels.get(channel_id) else { return };
    let room_name = channel.room_name(&state.flow_account_id);
    let Some(member) = channel.member_by_account_id(account_id) else { return };
    let hostmask = format!("{}!{}@{}", member.irc_nickname(), member.user, member.host);
    state.notify_clients(&format!(":{} JOIN :{}", hostmask, room_name));
}

/// A message on an already-known channel: resolves sender and channel, then
/// broadcasts PRIVMSG to all clients. Drops silently if either is unknown.
async fn process_regular_message(state: &mut GatewayState, payload: crate::backend::RegularMessagePayload) {
    let Some(channel) = state.channels.get(&payload.channel_id) else {
        debug!(channel_id = payload.channel_id, "regular message for unknown channel dropped");
        return;
    };
    let Some(sender) = channel.member_by_account_id(&payload.sender_account_id) else {
        debug!(channel_id = payload.channel_id, "regular message from unknown member dropped");
        return;
    };
    let room_name = channel.room_name(&state.flow_account_id);
    let hostmask = format!("{}!{}@{}", sender.irc_nickname(), sender.user, sender.host);
    let text = payload.text.replace('\n', "\\n");
    let text = if state.show_timestamps {
        format!("{} {}", crate::common::format_message_timestamp(payload.creation_time), text)
    } else {
        text
    };
    state.notify_clients(&format!(":{} PRIVMSG {} :{}", hostmask, room_name, text));
}

/// `channel-member-event` notification: a member joined a channel the
/// gateway already knows about. Adds the member if new, then emits JOIN.
async fn handle_channel_member(state: &mut GatewayState, pairs: Vec<crate::backend::ChannelMemberPayload>) {
    for pair in pairs {
        let Some(channel) = state.channels.get(&pair.channel_id) else {
            debug!(channel_id = pair.channel_id, "channel-member event for unknown channel dropped");
            continue;
        };
        if channel.member_by_account_id(&pair.account_id).is_some() {
            continue;
        }
        let org_name = channel.org_name.clone();

        let members = match state.backend.enumerate_channel_members(&pair.channel_id).await {
            Ok(members) => members,
            Err(err) => {
                debug!(%err, channel_id = pair.channel_id, "enumerate_channel_members failed for member event");
                continue;
            }
        };
        let Some(new_member) = members.into_iter().find(|m| m.account_id == pair.account_id) else {
            continue;
        };
        if let Some(channel) = state.channels.get_mut(&pair.channel_id) {
            channel.add_member(Member::new(new_member.email_address, new_member.account_id, org_name));
        }
        emit_join_for_member(state, &pair.channel_id, &pair.account_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::backend::{ChannelIdPayload, ChannelMemberPayload, ChannelPayload, MemberPayload, MessageNotificationPayload, OrgPayload, RegularMessagePayload};
    use crate::session::ClientSession;

    async fn state_with_client(backend: FakeBackend) -> (GatewayState, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_side = TcpStream::connect(addr).await.unwrap();
        let (server_side, peer_addr) = listener.accept().await.unwrap();

        let mut state = GatewayState::new(Arc::new(backend), "test.gw".to_string(), "alice@x".to_string(), false);
        state.flow_account_id = "A1".to_string();
        let id = state.next_session_id();
        state.clients.insert(id, ClientSession::new(id, server_side, peer_addr));
        (state, client_side)
    }

    async fn read_available(stream: &mut TcpStream) -> String {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let mut buf = [0u8; 4096];
        match stream.try_read(&mut buf) {
            Ok(n) => String::from_utf8_lossy(&buf[..n]).to_string(),
            Err(_) => String::new(),
        }
    }

    fn flush_all(state: &mut GatewayState) {
        for client in state.clients.values_mut() {
            let _ = client.try_flush_write();
        }
    }

    #[tokio::test]
    async fn channel_materializes_on_message_notification_and_emits_join() {
        let backend = FakeBackend::default();
        backend.set_members("C1", vec![MemberPayload { account_id: "A1".to_string(), email_address: "alice@x".to_string() }]);
        let (mut state, mut client_side) = state_with_client(backend).await;

        state.organizations.insert("O1".to_string(), "Acme".to_string());
        handle_channel(&mut state, vec![ChannelIdPayload { id: "C1".to_string(), org_id: "O1".to_string() }]);
        assert!(state.pending_channels.contains_key("C1"));

        handle_message(
            &mut state,
            MessageNotificationPayload {
                channel_messages: vec![crate::backend::ChannelMessagePayload {
                    id: "C1".to_string(),
                    name: "general".to_string(),
                    purpose: "group".to_string(),
                }],
                regular_messages: vec![],
            },
        )
        .await;

        assert!(!state.pending_channels.contains_key("C1"));
        assert!(state.channels.contains_key("C1"));

        flush_all(&mut state);
        let frame = read_available(&mut client_side).await;
        assert!(frame.contains("JOIN :#general(Acme)"), "unexpected frame: {frame}");
    }

    #[tokio::test]
    async fn message_for_unknown_channel_is_dropped() {
        let backend = FakeBackend::default();
        let (mut state, _client_side) = state_with_client(backend).await;

        handle_message(
            &mut state,
            MessageNotificationPayload {
                channel_messages: vec![],
                regular_messages: vec![RegularMessagePayload {
                    sender_account_id: "A2".to_string(),
                    channel_id: "C-UNKNOWN".to_string(),
                    text: "hi".to_string(),
                    creation_time: 1,
                }],
            },
        )
        .await;

        assert!(state.channels.is_empty());
    }

    #[tokio::test]
    async fn regular_message_escapes_newlines() {
        let backend = FakeBackend::default();
        let (mut state, mut client_side) = state_with_client(backend).await;

        let mut channel = Channel::new_regular("C1", "O1", "Acme", "general");
        channel.add_member(crate::model::Member::new("bob", "A2", "Acme"));
        state.channels.insert("C1".to_string(), channel);

        handle_message(
            &mut state,
            MessageNotificationPayload {
                channel_messages: vec![],
                regular_messages: vec![RegularMessagePayload {
                    sender_account_id: "A2".to_string(),
                    channel_id: "C1".to_string(),
                    text: "line one\nline two".to_string(),
                    creation_time: 1,
                }],
            },
        )
        .await;

        flush_all(&mut state);
        let frame = read_available(&mut client_side).await;
        assert!(frame.contains("line one\\nline two"), "unexpected frame: {frame}");
    }

    #[tokio::test]
    async fn collision_detection_suffixes_second_channel() {
        let backend = FakeBackend::default();
        let (mut state, _client_side) = state_with_client(backend).await;

        let c1 = Channel::new_regular("C1111111", "O1", "Acme", "general");
        state.add_channel(c1);
        let c2 = Channel::new_regular("C2222222", "O1", "Acme", "general");
        state.add_channel(c2);

        let names: Vec<String> = state.channels.values().map(|c| c.room_name("A1")).collect();
        assert!(names.contains(&"#general(Acme)".to_string()));
        assert!(names.contains(&"#general(Acme)-C2222".to_string()));
    }

    #[tokio::test]
    async fn channel_member_event_adds_member_and_emits_join_for_only_that_member() {
        let backend = FakeBackend::default();
        backend.set_members(
            "C1",
            vec![
                MemberPayload { account_id: "A1".to_string(), email_address: "alice@x".to_string() },
                MemberPayload { account_id: "A2".to_string(), email_address: "bob".to_string() },
            ],
        );
        let (mut state, mut client_side) = state_with_client(backend).await;

        let mut channel = Channel::new_regular("C1", "O1", "Acme", "general");
        channel.add_member(crate::model::Member::new("alice@x", "A1", "Acme"));
        state.channels.insert("C1".to_string(), channel);

        handle_channel_member(&mut state, vec![ChannelMemberPayload { channel_id: "C1".to_string(), account_id: "A2".to_string() }]).await;

        assert_eq!(state.channels.get("C1").unwrap().members.len(), 2);
        flush_all(&mut state);
        let frame = read_available(&mut client_side).await;
        assert!(frame.contains("bob(Acme)!"), "expected only the new member's JOIN: {frame}");
        assert_eq!(frame.matches("JOIN").count(), 1);
    }

    #[tokio::test]
    async fn org_notification_loads_channels_and_emits_join() {
        let backend = FakeBackend::default();
        backend.add_channel("O1", ChannelPayload { id: "C1".to_string(), name: "general".to_string(), purpose: "group".to_string() });
        backend.set_members("C1", vec![MemberPayload { account_id: "A1".to_string(), email_address: "alice@x".to_string() }]);
        let (mut state, mut client_side) = state_with_client(backend).await;

        handle_org(&mut state, vec![OrgPayload { id: "O1".to_string(), name: "Acme".to_string() }]).await;

        assert_eq!(state.organizations.get("O1").map(String::as_str), Some("Acme"));
        assert!(state.channels.contains_key("C1"));
        flush_all(&mut state);
        let frame = read_available(&mut client_side).await;
        assert!(frame.contains("JOIN :#general(Acme)"), "unexpected frame: {frame}");
    }

    #[tokio::test]
    async fn repeat_org_notification_upserts_without_duplicating_members_or_rejoining() {
        let backend = FakeBackend::default();
        backend.add_channel("O1", ChannelPayload { id: "C1".to_string(), name: "general".to_string(), purpose: "group".to_string() });
        backend.set_members("C1", vec![MemberPayload { account_id: "A1".to_string(), email_address: "alice@x".to_string() }]);
        let (mut state, mut client_side) = state_with_client(backend).await;

        handle_org(&mut state, vec![OrgPayload { id: "O1".to_string(), name: "Acme".to_string() }]).await;
        flush_all(&mut state);
        let _ = read_available(&mut client_side).await;

        // A repeat notification for the same org (e.g. its name changed
        // server-side) must upsert the org name and re-scope channel
        // loading, not be dropped outright — but the already-known channel
        // must not be re-added (no duplicate members, no second JOIN).
        handle_org(&mut state, vec![OrgPayload { id: "O1".to_string(), name: "Acme Renamed".to_string() }]).await;

        assert_eq!(state.organizations.get("O1").map(String::as_str), Some("Acme Renamed"));
        assert_eq!(state.channels.get("C1").unwrap().members.len(), 1, "member must not be duplicated on re-notification");
        flush_all(&mut state);
        let frame = read_available(&mut client_side).await;
        assert!(frame.is_empty(), "already-known channel must not re-emit JOIN: {frame}");
    }
}
