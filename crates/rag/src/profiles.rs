use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use tabrag_core::Domain;

pub const DEFAULT_BOT_ID: &str = "public-admisiones";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub hours: String,
}

impl Contact {
    /// Where the fallback answer points users, if any contact field is set.
    pub fn hint(&self) -> Option<&str> {
        let email = self.email.trim();
        let phone = self.phone.trim();
        if !email.is_empty() {
            Some(email)
        } else if !phone.is_empty() {
            Some(phone)
        } else if !self.hours.trim().is_empty() {
            Some("Admisiones")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotProfile {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub allowed_domains: Vec<Domain>,
    #[serde(default)]
    pub contact: Contact,
    #[serde(default)]
    pub system_instruction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotProfiles {
    #[serde(default)]
    pub default_bot_id: Option<String>,
    pub bots: IndexMap<String, BotProfile>,
}

impl Default for BotProfiles {
    fn default() -> Self {
        let mut bots = IndexMap::new();
        bots.insert(DEFAULT_BOT_ID.to_string(), builtin_profile());
        Self {
            default_bot_id: Some(DEFAULT_BOT_ID.to_string()),
            bots,
        }
    }
}

fn builtin_profile() -> BotProfile {
    BotProfile {
        label: "Chat Admisiones (Público)".to_string(),
        allowed_domains: Domain::ALL.to_vec(),
        contact: Contact::default(),
        system_instruction: None,
    }
}

impl BotProfiles {
    /// Reads the YAML profile file; anything unreadable yields the built-in profile.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "bot profiles not readable, using built-in profile");
                return Self::default();
            }
        };
        Self::from_yaml(&raw).unwrap_or_else(|| {
            warn!(path = %path.display(), "invalid bot profiles, using built-in profile");
            Self::default()
        })
    }

    pub fn from_yaml(raw: &str) -> Option<Self> {
        let mut profiles: BotProfiles = match serde_yaml::from_str(raw) {
            Ok(profiles) => profiles,
            Err(err) => {
                warn!(error = %err, "bot profiles do not parse");
                return None;
            }
        };
        if profiles.bots.is_empty() {
            return None;
        }
        if profiles.default_bot_id.is_none() {
            profiles.default_bot_id = profiles.bots.keys().next().cloned();
        }
        Some(profiles)
    }

    pub fn default_bot_id(&self) -> &str {
        self.default_bot_id
            .as_deref()
            .or_else(|| self.bots.keys().next().map(String::as_str))
            .unwrap_or(DEFAULT_BOT_ID)
    }

    /// The requested bot id (or the default) with its profile. Unknown ids keep
    /// their name but borrow the default profile.
    pub fn get(&self, bot_id: Option<&str>) -> (String, BotProfile) {
        let default_id = self.default_bot_id();
        let bot_id = bot_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(default_id)
            .to_string();
        let profile = self
            .bots
            .get(&bot_id)
            .or_else(|| self.bots.get(default_id))
            .or_else(|| self.bots.values().next())
            .cloned()
            .unwrap_or_else(builtin_profile);
        (bot_id, profile)
    }
}
