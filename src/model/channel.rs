use super::member::Member;
use crate::naming;

/// Whether a channel is a regular multi-member channel or a two-party
/// direct conversation.
#[derive(Debug, Clone)]
pub enum ChannelKind {
    Regular {
        /// Set when another channel already produces the same room name.
        name_collides: bool,
    },
    Direct {
        /// True if this conversation was started from the current session
        /// (via `PRIVMSG` to an unknown member), which changes how its room
        /// name is rendered — see `naming::direct_room_name`.
        created_in_session: bool,
    },
}

/// A backend channel mapped onto a line-protocol room.
#[derive(Debug, Clone)]
pub struct Channel {
    pub channel_id: String,
    pub org_id: String,
    pub org_name: String,
    /// Raw (unescaped) channel name. Empty for direct channels — their room
    /// name is derived from the other member's nickname instead.
    pub name: String,
    pub kind: ChannelKind,
    pub members: Vec<Member>,
}

impl Channel {
    pub fn new_regular(channel_id: impl Into<String>, org_id: impl Into<String>, org_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            org_id: org_id.into(),
            org_name: org_name.into(),
            name: name.into(),
            kind: ChannelKind::Regular { name_collides: false },
            members: Vec::new(),
        }
    }

    pub fn new_direct(channel_id: impl Into<String>, org_id: impl Into<String>, org_name: impl Into<String>, created_in_session: bool) -> Self {
        Self {
            channel_id: channel_id.into(),
            org_id: org_id.into(),
            org_name: org_name.into(),
            name: String::new(),
            kind: ChannelKind::Direct { created_in_session },
            members: Vec::new(),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.kind, ChannelKind::Direct { .. })
    }

    pub fn name_collides(&self) -> bool {
        matches!(self.kind, ChannelKind::Regular { name_collides: true })
    }

    pub fn set_name_collides(&mut self, collides: bool) {
        if let ChannelKind::Regular { name_collides } = &mut self.kind {
            *name_collides = collides;
        }
    }

    pub fn add_member(&mut self, member: Member) {
        self.members.push(member);
    }

    pub fn member_by_account_id(&self, account_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.account_id == account_id)
    }

    pub fn member_by_nickname(&self, nickname: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.irc_nickname() == nickname)
    }

    /// For a direct channel, the member that isn't the gateway's own
    /// logged-in identity. Panics if called on a regular channel or on a
    /// direct channel that doesn't have exactly two members — both are
    /// invariant violations the dispatcher must never let arise.
    pub fn other_direct_member(&self, local_account_id: &str) -> Option<&Member> {
        debug_assert!(self.is_direct());
        self.members.iter().find(|m| m.account_id != local_account_id)
    }

    /// The room name this channel presents on the line protocol.
    pub fn room_name(&self, local_account_id: &str) -> String {
        match &self.kind {
            ChannelKind::Regular { name_collides } => {
                naming::regular_room_name(&self.name, &self.org_name, &self.channel_id, *name_collides)
            }
            ChannelKind::Direct { created_in_session } => {
                let other = self.other_direct_member(local_account_id);
                let bare_nick = other.map(|m| m.bare_nickname()).unwrap_or_default();
                let full_nick = other.map(|m| m.irc_nickname()).unwrap_or_default();
                naming::direct_room_name(&bare_nick, &full_nick, &self.org_name, &self.channel_id, *created_in_session)
            }
        }
    }

    /// Pre-collision room name used purely to detect whether a *new* regular
    /// channel would collide with this one — always computed as if
    /// `name_collides` were false, since collision detection must compare
    /// base names, not already-suffixed ones.
    pub fn base_room_name(&self) -> Option<String> {
        match &self.kind {
            ChannelKind::Regular { .. } => Some(naming::regular_room_name(&self.name, &self.org_name, &self.channel_id, false)),
            ChannelKind::Direct { .. } => None,
        }
    }
}

/// A tentative `ChannelID → (OrgID, OrgName)` binding recorded when a
/// channel notification arrives ahead of its first message notification.
#[derive(Debug, Clone)]
pub struct PendingChannel {
    pub channel_id: String,
    pub org_id: String,
    pub org_name: String,
}
