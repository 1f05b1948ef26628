//! In-memory view of guilds, roles and members, fed by gateway dispatch
//! events. Never persisted; rebuilt from GUILD_CREATE on every reconnect.

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::types::{GuildCreate, GuildId, RoleId, UserId};

#[derive(Default)]
struct CachedGuild {
    roles: HashSet<RoleId>,
    members: HashMap<UserId, Vec<RoleId>>,
}

#[derive(Default)]
pub struct DirectoryCache {
    guilds: RwLock<HashMap<GuildId, CachedGuild>>,
}

impl DirectoryCache {
    pub async fn apply_guild_create(&self, guild: GuildCreate) {
        let mut guilds = self.guilds.write().await;
        let entry = guilds.entry(guild.id).or_default();
        entry.roles = guild.roles.iter().map(|r| r.id).collect();
        for member in guild.members {
            entry.members.insert(member.user.id, member.roles);
        }
    }

    pub async fn remove_guild(&self, guild: GuildId) {
        self.guilds.write().await.remove(&guild);
    }

    pub async fn upsert_role(&self, guild: GuildId, role: RoleId) {
        let mut guilds = self.guilds.write().await;
        guilds.entry(guild).or_default().roles.insert(role);
    }

    pub async fn remove_role(&self, guild: GuildId, role: RoleId) {
        let mut guilds = self.guilds.write().await;
        if let Some(entry) = guilds.get_mut(&guild) {
            entry.roles.remove(&role);
        }
    }

    pub async fn upsert_member(&self, guild: GuildId, user: UserId, roles: Vec<RoleId>) {
        let mut guilds = self.guilds.write().await;
        guilds.entry(guild).or_default().members.insert(user, roles);
    }

    pub async fn remove_member(&self, guild: GuildId, user: UserId) {
        let mut guilds = self.guilds.write().await;
        if let Some(entry) = guilds.get_mut(&guild) {
            entry.members.remove(&user);
        }
    }

    pub async fn guild_known(&self, guild: GuildId) -> bool {
        self.guilds.read().await.contains_key(&guild)
    }

    pub async fn role_known(&self, guild: GuildId, role: RoleId) -> bool {
        self.guilds
            .read()
            .await
            .get(&guild)
            .is_some_and(|g| g.roles.contains(&role))
    }

    pub async fn member_roles(&self, guild: GuildId, user: UserId) -> Option<Vec<RoleId>> {
        self.guilds
            .read()
            .await
            .get(&guild)
            .and_then(|g| g.members.get(&user).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guild_payload() -> GuildCreate {
        serde_json::from_str(
            r#"{
                "id": "7",
                "roles": [{ "id": "7" }, { "id": "99" }],
                "members": [{ "user": { "id": "42" }, "roles": ["1", "2"] }]
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn guild_create_populates_roles_and_members() {
        let cache = DirectoryCache::default();
        cache.apply_guild_create(guild_payload()).await;

        assert!(cache.guild_known(GuildId(7)).await);
        assert!(cache.role_known(GuildId(7), RoleId(99)).await);
        assert!(!cache.role_known(GuildId(7), RoleId(100)).await);
        assert_eq!(
            cache.member_roles(GuildId(7), UserId(42)).await,
            Some(vec![RoleId(1), RoleId(2)])
        );
    }

    #[tokio::test]
    async fn member_update_replaces_role_list() {
        let cache = DirectoryCache::default();
        cache.apply_guild_create(guild_payload()).await;

        cache
            .upsert_member(GuildId(7), UserId(42), vec![RoleId(99)])
            .await;
        assert_eq!(
            cache.member_roles(GuildId(7), UserId(42)).await,
            Some(vec![RoleId(99)])
        );

        cache.remove_member(GuildId(7), UserId(42)).await;
        assert_eq!(cache.member_roles(GuildId(7), UserId(42)).await, None);
    }

    #[tokio::test]
    async fn role_delete_removes_only_that_role() {
        let cache = DirectoryCache::default();
        cache.apply_guild_create(guild_payload()).await;

        cache.remove_role(GuildId(7), RoleId(99)).await;
        assert!(!cache.role_known(GuildId(7), RoleId(99)).await);
        assert!(cache.role_known(GuildId(7), RoleId(7)).await);
    }

    #[tokio::test]
    async fn unknown_guild_resolves_nothing() {
        let cache = DirectoryCache::default();
        assert!(!cache.guild_known(GuildId(1)).await);
        assert_eq!(cache.member_roles(GuildId(1), UserId(2)).await, None);
    }
}
