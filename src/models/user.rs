use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_USER_ID_LEN: usize = 128;

/// Идентичность пользователя, приходящая от внешней подсистемы авторизации.
/// Координатор её не проверяет, только атрибутирует места.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Returns the reason when `raw` is not a usable identity.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("user id is empty".to_string());
        }
        if trimmed.len() > MAX_USER_ID_LEN {
            return Err(format!("user id is longer than {} bytes", MAX_USER_ID_LEN));
        }
        if trimmed.chars().any(char::is_control) {
            return Err("user id contains control characters".to_string());
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        UserId::parse(&raw)
    }
}

impl From<UserId> for String {
    fn from(user: UserId) -> Self {
        user.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
