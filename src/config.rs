use anyhow::{bail, Context, Result};
use std::env;

use crate::discord::types::RoleId;

/// Process configuration, read once at startup. No hot-reload.
#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub target_rank_id: RoleId,
    pub check_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let discord_token = get("DISCORD_TOKEN")
            .filter(|t| !t.is_empty())
            .context("DISCORD_TOKEN is not set")?;

        let db_port = match get("DB_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("invalid DB_PORT: '{}'", raw))?,
            None => 5432,
        };

        let target_rank_id = match get("TARGET_RANK_ID") {
            Some(raw) => RoleId(
                raw.parse::<u64>()
                    .with_context(|| format!("invalid TARGET_RANK_ID: '{}'", raw))?,
            ),
            None => RoleId(123),
        };

        let check_interval_secs = match get("CHECK_INTERVAL_SECONDS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("invalid CHECK_INTERVAL_SECONDS: '{}'", raw))?,
            None => 300,
        };
        if check_interval_secs == 0 {
            bail!("CHECK_INTERVAL_SECONDS must be greater than zero");
        }

        Ok(Self {
            discord_token,
            db_host: get("DB_HOST").unwrap_or_else(|| "postgres".into()),
            db_port,
            db_name: get("DB_NAME").unwrap_or_else(|| "discord_bot".into()),
            db_user: get("DB_USER").unwrap_or_else(|| "bot_user".into()),
            db_password: get("DB_PASSWORD").unwrap_or_default(),
            target_rank_id,
            check_interval_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let cfg = Config::from_lookup(lookup(&[("DISCORD_TOKEN", "abc")])).unwrap();
        assert_eq!(cfg.db_host, "postgres");
        assert_eq!(cfg.db_port, 5432);
        assert_eq!(cfg.db_name, "discord_bot");
        assert_eq!(cfg.db_user, "bot_user");
        assert_eq!(cfg.db_password, "");
        assert_eq!(cfg.target_rank_id, RoleId(123));
        assert_eq!(cfg.check_interval_secs, 300);
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DISCORD_TOKEN"));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "6432"),
            ("TARGET_RANK_ID", "987654321"),
            ("CHECK_INTERVAL_SECONDS", "60"),
        ]))
        .unwrap();
        assert_eq!(cfg.db_host, "db.internal");
        assert_eq!(cfg.db_port, 6432);
        assert_eq!(cfg.target_rank_id, RoleId(987654321));
        assert_eq!(cfg.check_interval_secs, 60);
    }

    #[test]
    fn unparseable_interval_is_an_error() {
        let err = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("CHECK_INTERVAL_SECONDS", "five minutes"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("CHECK_INTERVAL_SECONDS"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("CHECK_INTERVAL_SECONDS", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }
}
