//! Client Session: the per-connection line-protocol state machine.
//! Grounded on `irc_client.py`'s `IRCClient`: registration forces
//! `NICK`/`USER` to the backend identity, then a fixed command dispatch
//! table, with keepalive driven externally by the event loop.

use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::TcpStream;
use tracing::debug;

use crate::backend::{MessagePayload, NotificationKind};
use crate::common::format_message_timestamp;
use crate::error::LineProtocolError;
use crate::naming;
use crate::proto::parse;
use crate::state::GatewayState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Registration,
    Commands,
}

/// The 180s/90s keepalive thresholds.
const PING_TIMEOUT_SECS: u64 = 180;
const PING_IDLE_SECS: u64 = 90;

pub struct ClientSession {
    pub id: SessionId,
    pub stream: TcpStream,
    read_buf: String,
    write_buf: Vec<u8>,
    pub nickname: String,
    pub user: String,
    pub realname: String,
    pub host: String,
    pub state: SessionState,
    has_nick: bool,
    has_user: bool,
    pub last_activity: Instant,
    pub sent_ping: bool,
    /// Set once the session should be torn down after its write buffer
    /// drains; carries the `ERROR :<reason>` text.
    pub quit_reason: Option<String>,
}

impl ClientSession {
    pub fn new(id: SessionId, stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            id,
            stream,
            read_buf: String::new(),
            write_buf: Vec::new(),
            nickname: String::new(),
            user: String::new(),
            realname: String::new(),
            host: addr.ip().to_string(),
            state: SessionState::Registration,
            has_nick: false,
            has_user: false,
            last_activity: Instant::now(),
            sent_ping: false,
            quit_reason: None,
        }
    }

    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nickname, self.user, self.host)
    }

    /// Appends `frame` plus the line terminator to the write buffer.
    pub fn message(&mut self, frame: &str) {
        self.write_buf.extend_from_slice(frame.as_bytes());
        self.write_buf.extend_from_slice(b"\r\n");
    }

    /// A server-originated numeric/command reply, prefixed with the
    /// gateway name.
    pub fn reply(&mut self, gateway_name: &str, body: &str) {
        self.message(&format!(":{} {}", gateway_name, body));
    }

    pub fn has_pending_write(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Non-blocking drain of everything currently readable, split into
    /// complete lines. `Ok(vec![])` means nothing was ready this tick;
    /// `Err` means the peer closed or errored and the session should be
    /// torn down.
    pub fn try_read_lines(&mut self) -> std::io::Result<Vec<String>> {
        let mut buf = [0u8; 1024];
        let mut read_any = false;
        loop {
            match self.stream.try_read(&mut buf) {
                Ok(0) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "EOF"));
                }
                Ok(n) => {
                    read_any = true;
                    self.read_buf.push_str(&String::from_utf8_lossy(&buf[..n]));
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        if read_any {
            self.last_activity = Instant::now();
            self.sent_ping = false;
        }
        Ok(parse::drain_lines(&mut self.read_buf))
    }

    /// Non-blocking drain of the write buffer.
    pub fn try_flush_write(&mut self) -> std::io::Result<()> {
        while !self.write_buf.is_empty() {
            match self.stream.try_write(&self.write_buf) {
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Keepalive check. Returns `true` if the session timed out and should
    /// be disconnected.
    pub fn check_aliveness(&mut self, gateway_name: &str) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_activity).as_secs() > PING_TIMEOUT_SECS {
            return true;
        }
        if !self.sent_ping && now.duration_since(self.last_activity).as_secs() > PING_IDLE_SECS {
            if self.state == SessionState::Commands {
                self.reply_raw(&format!("PING :{}", gateway_name));
                self.sent_ping = true;
            } else {
                return true;
            }
        }
        false
    }

    fn reply_raw(&mut self, body: &str) {
        self.message(body);
    }
}

/// Dispatches one parsed line through the session's current state.
/// Mirrors `IRCClient.__parse_read_buffer`'s per-line call into either the
/// registration or command handler.
pub async fn handle_line(state: &mut GatewayState, session: &mut ClientSession, line: &str) {
    let Some((command, args)) = parse::parse_line(line) else { return };
    match session.state {
        SessionState::Registration => handle_registration(state, session, &command, &args).await,
        SessionState::Commands => handle_command(state, session, &command, &args).await,
    }
}

async fn handle_registration(state: &mut GatewayState, session: &mut ClientSession, command: &str, args: &[String]) {
    match command {
        "NICK" => {
            session.nickname = state.flow_username.clone();
            session.has_nick = true;
        }
        "USER" => {
            session.user = state.flow_username.clone();
            session.has_user = true;
        }
        "QUIT" => {
            let reason = args.first().cloned().unwrap_or_else(|| "Client quit".to_string());
            session.quit_reason = Some(reason);
            return;
        }
        _ => {}
    }
    if session.has_nick && session.has_user {
        complete_registration(state, session).await;
    }
}

async fn complete_registration(state: &mut GatewayState, session: &mut ClientSession) {
    let nick = session.nickname.clone();
    session.reply(&state.gateway_name, &format!("001 {} :Hi, welcome to Flow", nick));
    session.reply(
        &state.gateway_name,
        &format!("002 {} :Your host is {}, running version roomline-gateway", nick, state.gateway_name),
    );

    if let Err(err) = state.load_orgs_and_channels().await {
        debug!(%err, "load_orgs_and_channels failed during registration");
    }

    send_lusers(state, session);
    send_motd(state, session);

    let hostmask = session.hostmask();
    session.message(&format!(":{} NICK :{}", hostmask, nick));

    let channel_ids: Vec<String> = state.channels.keys().cloned().collect();
    for channel_id in &channel_ids {
        send_channel_join_commands(state, session, channel_id);
    }
    for channel_id in &channel_ids {
        if let Err(err) = send_channel_messages(state, session, channel_id).await {
            debug!(%err, channel_id, "enumerate_messages failed during registration replay");
        }
    }

    // This session is pulled out of `state.clients` for the duration of
    // line handling (see event_loop's remove-process-reinsert), so an empty
    // map here means it's the only client — the first one to register.
    if state.clients.is_empty() {
        register_notification_callbacks(state).await;
    }

    session.state = SessionState::Commands;
}

/// Subscribes to every notification kind the dispatcher handles. Called
/// once, when the first client completes registration.
async fn register_notification_callbacks(state: &GatewayState) {
    for kind in [NotificationKind::Org, NotificationKind::Channel, NotificationKind::Message, NotificationKind::ChannelMember] {
        if let Err(err) = state.backend.register_callback(kind).await {
            debug!(%err, kind = kind.as_str(), "register_callback failed");
        }
    }
}

fn send_lusers(state: &GatewayState, session: &mut ClientSession) {
    let nick = session.nickname.clone();
    session.reply(
        &state.gateway_name,
        &format!("251 {} :There are {} orgs and {} channels", nick, state.organizations.len(), state.channels.len()),
    );
}

fn send_motd(state: &GatewayState, session: &mut ClientSession) {
    let nick = session.nickname.clone();
    session.reply(&state.gateway_name, &format!("375 {} :- Message of the day -", nick));
    session.reply(&state.gateway_name, &format!("372 {} :- Your Flow username is: {}", nick, nick));
    session.reply(&state.gateway_name, &format!("372 {} :- List of Organizations and Channels:", nick));

    for org_name in state.organizations.values() {
        let channels: Vec<_> = state.channels.values().filter(|ch| &ch.org_name == org_name).collect();
        session.reply(&state.gateway_name, &format!("372 {} :  - {}: [{} channels]", nick, org_name, channels.len()));
        let mut rows: Vec<(String, bool, usize)> =
            channels.iter().map(|ch| (ch.room_name(&state.flow_account_id), ch.is_direct(), ch.members.len())).collect();
        rows.sort();
        for (room_name, is_direct, member_count) in rows {
            let suffix = if is_direct { " [direct conversation]".to_string() } else { format!(" [{} members]", member_count) };
            session.reply(&state.gateway_name, &format!("372 {} :    - {}{}", nick, room_name, suffix));
        }
    }
    session.reply(&state.gateway_name, &format!("376 {} :End of /MOTD command", nick));
}

/// Emits this client's own self-JOIN for `channel_id`, then JOIN for every
/// other member. Only sent to `session` — this is the registration-time
/// catch-up, not a broadcast.
fn send_channel_join_commands(state: &GatewayState, session: &mut ClientSession, channel_id: &str) {
    let Some(channel) = state.channels.get(channel_id) else { return };
    let room_name = channel.room_name(&state.flow_account_id);
    let hostmask = session.hostmask();
    session.message(&format!(":{} JOIN :{}", hostmask, room_name));
    for member in &channel.members {
        if member.account_id != state.flow_account_id {
            session.message(&format!(":{}!{}@{} JOIN :{}", member.irc_nickname(), member.user, member.host, room_name));
        }
    }
}

async fn send_channel_messages(state: &mut GatewayState, session: &mut ClientSession, channel_id: &str) -> Result<(), crate::error::BackendError> {
    let Some(channel) = state.channels.get(channel_id) else { return Ok(()) };
    let org_id = channel.org_id.clone();
    let room_name = channel.room_name(&state.flow_account_id);
    let mut messages: Vec<MessagePayload> = state.backend.enumerate_messages(&org_id, channel_id).await?;
    messages.reverse();
    let show_timestamps = state.show_timestamps;
    let Some(channel) = state.channels.get(channel_id) else { return Ok(()) };
    for message in &messages {
        let Some(member) = channel.member_by_account_id(&message.sender_account_id) else { continue };
        let nickname = if member.account_id == state.flow_account_id { member.bare_nickname() } else { member.irc_nickname() };
        let text = if show_timestamps {
            format!("{} {}", format_message_timestamp(message.creation_time), message.text)
        } else {
            message.text.clone()
        };
        session.message(&format!(":{}!{}@{} PRIVMSG {} :{}", nickname, member.user, member.host, room_name, text));
    }
    Ok(())
}

async fn handle_command(state: &mut GatewayState, session: &mut ClientSession, command: &str, args: &[String]) {
    match command {
        "AWAY" | "ISON" | "JOIN" | "NICK" | "PART" | "TOPIC" => {}
        "LIST" => handle_list(state, session, args),
        "LUSERS" => send_lusers(state, session),
        "MODE" => handle_mode(session, args),
        "MOTD" => send_motd(state, session),
        "PING" => handle_ping(state, session, args),
        "PONG" => {}
        "QUIT" => {
            let reason = args.first().cloned().unwrap_or_else(|| session.nickname.clone());
            session.quit_reason = Some(reason);
        }
        "WHO" => handle_who(state, session, args),
        "WHOIS" => handle_whois(state, session, args),
        "PRIVMSG" | "NOTICE" => handle_privmsg(state, session, command, args).await,
        other => {
            let nick = session.nickname.clone();
            session.reply(&state.gateway_name, &format!("421 {} {} :Unknown command", nick, other));
        }
    }
}

fn handle_list(state: &GatewayState, session: &mut ClientSession, args: &[String]) {
    let nick = session.nickname.clone();
    let mut channels: Vec<_> = if let Some(names) = args.first() {
        let wanted: Vec<&str> = names.split(',').collect();
        state.channels.values().filter(|ch| wanted.contains(&ch.room_name(&state.flow_account_id).as_str())).collect()
    } else {
        state.channels.values().collect()
    };
    channels.sort_by_key(|ch| ch.room_name(&state.flow_account_id));
    for channel in channels {
        session.reply(
            &state.gateway_name,
            &format!("322 {} {} {} :", nick, channel.room_name(&state.flow_account_id), channel.members.len()),
        );
    }
    session.reply(&state.gateway_name, &format!("323 {} :End of LIST", nick));
}

fn handle_mode(session: &mut ClientSession, args: &[String]) {
    let nick = session.nickname.clone();
    match args.first() {
        None => session.reply_raw(&format!("461 {} MODE :Not enough parameters", nick)),
        Some(target) => session.reply_raw(&format!("324 {} {}", nick, target)),
    }
}

fn handle_ping(state: &GatewayState, session: &mut ClientSession, args: &[String]) {
    let nick = session.nickname.clone();
    match args.first() {
        None => {
            let err = LineProtocolError::NoPingOrigin;
            session.reply(&state.gateway_name, &format!("{} {} :{}", err.numeric(), nick, err));
        }
        Some(origin) => session.reply_raw(&format!("PONG {} :{}", state.gateway_name, origin)),
    }
}

fn handle_who(state: &GatewayState, session: &mut ClientSession, args: &[String]) {
    let Some(target) = args.first() else { return };
    let Some(channel) = state.channel_by_room_name(target) else { return };
    let nick = session.nickname.clone();
    for member in &channel.members {
        session.reply(
            &state.gateway_name,
            &format!(
                "352 {} {} {} {} {} {} H :0 {}",
                nick,
                target,
                member.user,
                member.host,
                state.gateway_name,
                member.irc_nickname(),
                member.realname
            ),
        );
    }
    session.reply(&state.gateway_name, &format!("315 {} {} :End of WHO list", nick, target));
}

fn handle_whois(state: &GatewayState, session: &mut ClientSession, args: &[String]) {
    let Some(target) = args.first() else { return };
    let nick = session.nickname.clone();
    match state.get_member_by_irc_nickname(target) {
        Some(member) => {
            let member_nick = member.irc_nickname();
            session.reply(&state.gateway_name, &format!("311 {} {} {} {} * :{}", nick, member_nick, member.user, member.host, member.realname));
            session.reply(&state.gateway_name, &format!("312 {} {} {} :{}", nick, member_nick, "", ""));
            session.reply(&state.gateway_name, &format!("318 {} {} :End of WHOIS list", nick, member_nick));
        }
        None => {
            let err = LineProtocolError::NoSuchTarget(target.clone());
            session.reply(&state.gateway_name, &format!("{} {} {} :{}", err.numeric(), nick, target, err));
        }
    }
}

async fn handle_privmsg(state: &mut GatewayState, session: &mut ClientSession, command: &str, args: &[String]) {
    let nick = session.nickname.clone();
    if args.is_empty() {
        let err = LineProtocolError::NoRecipient;
        session.reply(&state.gateway_name, &format!("{} {} :{} ({})", err.numeric(), nick, err, command));
        return;
    }
    if args.len() < 2 {
        let err = LineProtocolError::NoTextToSend;
        session.reply(&state.gateway_name, &format!("{} {} :{}", err.numeric(), nick, err));
        return;
    }
    let target = &args[0];
    let text = &args[1];

    let existing = state.channel_by_room_name(target).map(|ch| (ch.org_id.clone(), ch.channel_id.clone()));
    let success = if let Some((org_id, channel_id)) = existing {
        state.backend.send_message(&org_id, &channel_id, text).await.is_ok()
    } else {
        send_to_member(state, target, text).await
    };

    if !success {
        let err = LineProtocolError::NoSuchTarget(target.clone());
        session.reply(&state.gateway_name, &format!("{} {} {} :{}", err.numeric(), nick, target, err));
    }
}

/// Resolves a `<user>(<org>)` target to a member, creating a direct
/// conversation if needed, then sends. Mirrors `send_to_member` in
/// `irc_client.py`.
async fn send_to_member(state: &mut GatewayState, target: &str, text: &str) -> bool {
    let Some((username, org_name)) = naming::parse_member_target(target) else { return false };
    let username = username.to_string();
    let org_name = org_name.to_string();

    let account_id = match state.get_member_by_irc_nickname(target) {
        Some(member) => member.account_id.clone(),
        None => match state.backend.get_peer(&username).await {
            Ok(peer) => peer.account_id,
            Err(_) => return false,
        },
    };
    if account_id.is_empty() {
        return false;
    }
    let Some(org_id) = state.get_org_id_from_name(&org_name) else { return false };

    let channel_id = match state.create_direct_channel(&account_id, &username, &org_id, &org_name).await {
        Ok(id) => id,
        Err(_) => return false,
    };
    state.backend.send_message(&org_id, &channel_id, text).await.is_ok()
}
