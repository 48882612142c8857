//! Pure functions mapping backend strings to line-protocol-legal tokens.
//!
//! These are the only functions allowed to know about the line protocol's
//! naming grammar.
//! Everything downstream (domain model, dispatcher, session) calls into
//! here rather than re-deriving escaping or collision suffixes itself.

/// Replaces `,` with `_` and space with `-`, the two characters the line
/// protocol reserves in channel/nickname tokens.
pub fn escape(raw: &str) -> String {
    raw.replace(',', "_").replace(' ', "-")
}

/// First 5 characters of a channel id, used as a collision-breaking suffix.
fn channel_suffix(channel_id: &str) -> String {
    let take = channel_id.char_indices().nth(5).map(|(i, _)| i).unwrap_or(channel_id.len());
    format!("-{}", &channel_id[..take])
}

/// Room name for a regular (non-direct) channel: `#<name>(<org>)`, with a
/// `-<first 5 chars of id>` suffix when `name_collides` is set.
pub fn regular_room_name(channel_name: &str, org_name: &str, channel_id: &str, name_collides: bool) -> String {
    let mut name = format!("#{}({})", escape(channel_name), escape(org_name));
    if name_collides {
        name.push_str(&channel_suffix(channel_id));
    }
    name
}

/// Room name for a direct channel.
///
/// If the conversation was created during the current session, the room
/// name is the other member's full nickname token `user(org)` (no `#`,
/// used as a private-message target). Otherwise it's rendered as
/// `#<bare-username>(<org>)-<suffix>` — note the other member's *bare*
/// username, not their full `user(org)` token, is used here (matches the
/// original gateway's `DirectChannel.get_irc_name`).
pub fn direct_room_name(other_bare_nick: &str, other_full_nick: &str, org_name: &str, channel_id: &str, created_in_session: bool) -> String {
    if created_in_session {
        other_full_nick.to_string()
    } else {
        format!("#{}({}){}", other_bare_nick, escape(org_name), channel_suffix(channel_id))
    }
}

/// Member nickname: `<escape(username)>(<escape(org)>)`.
pub fn member_nickname(username: &str, org_name: &str) -> String {
    format!("{}({})", escape(username), escape(org_name))
}

/// Splits a `<user>(<org>)` target into `(user, org)`. Used to resolve
/// PRIVMSG/NOTICE targets that aren't a known room name.
///
/// The pattern requires exactly one top-level `(...)` suffix; this mirrors
/// the original's `(.+)\((.+)\)` regex, which is greedy on the first group
/// and lazy-equivalent on the second because it anchors on the final `)`.
pub fn parse_member_target(target: &str) -> Option<(&str, &str)> {
    if !target.ends_with(')') {
        return None;
    }
    let open = target.find('(')?;
    let user = &target[..open];
    let org = &target[open + 1..target.len() - 1];
    if user.is_empty() || org.is_empty() {
        return None;
    }
    Some((user, org))
}
