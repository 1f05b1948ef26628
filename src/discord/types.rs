//! Wire types for the Discord gateway and REST API (v10 JSON encoding).
//!
//! Snowflake ids arrive as decimal strings on the wire; the id newtypes
//! below accept either strings or bare integers and always serialize back
//! to strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Gateway intents: GUILDS | GUILD_MEMBERS.
pub const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 1);

mod snowflake {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }
        match Raw::deserialize(d)? {
            Raw::Num(n) => Ok(n),
            Raw::Str(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(#[serde(with = "snowflake")] pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(#[serde(with = "snowflake")] pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(#[serde(with = "snowflake")] pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl GuildId {
    /// The implicit everyone role shares the guild's own id.
    pub fn everyone_role(self) -> RoleId {
        RoleId(self.0)
    }
}

/// Gateway frame envelope.
#[derive(Debug, Deserialize)]
pub struct GatewayEvent {
    pub op: u8,
    #[serde(default)]
    pub d: serde_json::Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
pub struct Ready {
    pub application: Application,
}

#[derive(Debug, Deserialize)]
pub struct Application {
    #[serde(with = "snowflake")]
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Role {
    pub id: RoleId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialUser {
    pub id: UserId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildMember {
    pub user: PartialUser,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

#[derive(Debug, Deserialize)]
pub struct GuildCreate {
    pub id: GuildId,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub members: Vec<GuildMember>,
}

#[derive(Debug, Deserialize)]
pub struct GuildDelete {
    pub id: GuildId,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Deserialize)]
pub struct GuildRoleChange {
    pub guild_id: GuildId,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct GuildRoleDelete {
    pub guild_id: GuildId,
    pub role_id: RoleId,
}

#[derive(Debug, Deserialize)]
pub struct GuildMemberChange {
    pub guild_id: GuildId,
    pub user: PartialUser,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

#[derive(Debug, Deserialize)]
pub struct GuildMemberRemove {
    pub guild_id: GuildId,
    pub user: PartialUser,
}

/// APPLICATION_COMMAND interaction type.
pub const INTERACTION_APPLICATION_COMMAND: u8 = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub token: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub data: Option<InteractionData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionData {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflakes_parse_from_strings_and_integers() {
        let from_str: UserId = serde_json::from_str("\"80351110224678912\"").unwrap();
        let from_num: UserId = serde_json::from_str("80351110224678912").unwrap();
        assert_eq!(from_str, UserId(80351110224678912));
        assert_eq!(from_str, from_num);
        assert_eq!(
            serde_json::to_string(&from_str).unwrap(),
            "\"80351110224678912\""
        );
    }

    #[test]
    fn everyone_role_mirrors_guild_id() {
        assert_eq!(GuildId(7).everyone_role(), RoleId(7));
    }

    #[test]
    fn interaction_create_payload_parses() {
        let raw = r#"{
            "id": "846462639134605312",
            "token": "tok",
            "type": 2,
            "data": { "id": "1", "name": "check_ranks", "type": 1 },
            "guild_id": "7"
        }"#;
        let interaction: Interaction = serde_json::from_str(raw).unwrap();
        assert_eq!(interaction.kind, INTERACTION_APPLICATION_COMMAND);
        assert_eq!(interaction.data.unwrap().name, "check_ranks");
    }

    #[test]
    fn guild_create_payload_parses_roles_and_members() {
        let raw = r#"{
            "id": "7",
            "name": "guild",
            "roles": [{ "id": "7", "name": "@everyone" }, { "id": "99", "name": "rank" }],
            "members": [{ "user": { "id": "42" }, "roles": ["99"] }]
        }"#;
        let guild: GuildCreate = serde_json::from_str(raw).unwrap();
        assert_eq!(guild.id, GuildId(7));
        assert_eq!(guild.roles.len(), 2);
        assert_eq!(guild.members[0].user.id, UserId(42));
        assert_eq!(guild.members[0].roles, vec![RoleId(99)]);
    }
}
