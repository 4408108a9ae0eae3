//! The principal the client connects as.

use serde::{Deserialize, Serialize};

/// Logged-in user as persisted by the portal. Only `id` and `club_id` drive channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub club_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            club_id: None,
            role: None,
            email: None,
        }
    }

    pub fn with_club(mut self, club_id: impl Into<String>) -> Self {
        self.club_id = Some(club_id.into());
        self
    }

    /// An identity with a blank id is treated as "not logged in".
    pub fn is_authenticated(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Club id, ignoring blank values.
    pub fn club(&self) -> Option<&str> {
        self.club_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// The part of the identity that decides the channel set. A change here means a new client.
    pub fn channel_key(&self) -> (String, Option<String>) {
        (self.id.trim().to_string(), self.club().map(str::to_string))
    }
}

// The portal stores ids as numbers or strings depending on the endpoint that wrote them.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_numeric_ids() {
        let identity: Identity =
            serde_json::from_str(r#"{"id":42,"clubId":7,"role":"SOCIO"}"#).unwrap();
        assert_eq!(identity.id, "42");
        assert_eq!(identity.club(), Some("7"));
        assert_eq!(identity.role.as_deref(), Some("SOCIO"));
    }

    #[test]
    fn missing_club_is_none() {
        let identity: Identity = serde_json::from_str(r#"{"id":"u1","clubId":null}"#).unwrap();
        assert_eq!(identity.club(), None);
        assert!(identity.is_authenticated());
    }

    #[test]
    fn blank_id_is_not_authenticated() {
        assert!(!Identity::new("  ").is_authenticated());
        assert!(Identity::new("1").is_authenticated());
    }

    #[test]
    fn channel_key_ignores_role_and_email() {
        let mut a = Identity::new("1").with_club("9");
        let b = a.clone();
        a.role = Some("ADMIN".to_string());
        a.email = Some("a@example.org".to_string());
        assert_eq!(a.channel_key(), b.channel_key());
        assert_ne!(a.channel_key(), Identity::new("1").channel_key());
    }
}
