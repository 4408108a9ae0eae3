//! Channels and their STOMP destinations.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::identity::Identity;

const GENERAL_TOPIC: &str = "/topic/general";
const USER_TOPIC_PREFIX: &str = "/topic/user/";
const CLUB_TOPIC_PREFIX: &str = "/topic/club/";

/// Broadcast scope a client subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Channel {
    /// Everyone logged in.
    General,
    /// One user.
    User(String),
    /// Members of one club.
    Club(String),
}

impl Channel {
    /// Derive the channel set from an identity: general, then user, then club.
    /// Unauthenticated identities get no channels at all.
    pub fn for_identity(identity: &Identity) -> Vec<Channel> {
        if !identity.is_authenticated() {
            return Vec::new();
        }
        let mut channels = vec![Channel::General, Channel::User(identity.id.trim().to_string())];
        if let Some(club) = identity.club() {
            channels.push(Channel::Club(club.to_string()));
        }
        channels
    }

    /// STOMP destination for this channel.
    pub fn destination(&self) -> String {
        match self {
            Channel::General => GENERAL_TOPIC.to_string(),
            Channel::User(id) => format!("{USER_TOPIC_PREFIX}{id}"),
            Channel::Club(id) => format!("{CLUB_TOPIC_PREFIX}{id}"),
        }
    }

    /// Short label shown next to a notification: `general`, `user` or `club`.
    pub fn kind(&self) -> &'static str {
        match self {
            Channel::General => "general",
            Channel::User(_) => "user",
            Channel::Club(_) => "club",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::General => f.write_str("general"),
            Channel::User(id) => write!(f, "user:{id}"),
            Channel::Club(id) => write!(f, "club:{id}"),
        }
    }
}
