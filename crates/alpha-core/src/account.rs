//! Account model for exchange identities under management.
//!
//! Accounts are created and refreshed out-of-band; the trading and claim
//! loops read them and only ever write back a login-status transition
//! after an authentication failure.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Persisted login status of an account's credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginStatus {
    Valid,
    Invalid,
    Unknown,
}

impl LoginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginStatus {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(Self::Valid),
            "invalid" => Ok(Self::Invalid),
            "unknown" => Ok(Self::Unknown),
            other => Err(crate::CoreError::InvalidLoginStatus(other.to_string())),
        }
    }
}

/// One exchange identity under management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub email: String,
    /// Opaque authentication headers captured out-of-band.
    pub auth_headers: HashMap<String, String>,
    /// Opaque authentication cookies, if the capture included them.
    pub auth_cookies: Option<HashMap<String, String>>,
    pub score: i64,
    pub login_status: LoginStatus,
}

impl Account {
    /// Whether this account can be used for claim/trade/stream operations.
    ///
    /// Missing headers mean the operation is skipped with a logged reason,
    /// never retried against the exchange.
    pub fn has_auth(&self) -> bool {
        !self.auth_headers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(headers: HashMap<String, String>) -> Account {
        Account {
            id: 1,
            name: "acct".to_string(),
            email: "acct@example.com".to_string(),
            auth_headers: headers,
            auth_cookies: None,
            score: 0,
            login_status: LoginStatus::Valid,
        }
    }

    #[test]
    fn test_has_auth() {
        assert!(!account(HashMap::new()).has_auth());

        let mut headers = HashMap::new();
        headers.insert("csrftoken".to_string(), "abc".to_string());
        assert!(account(headers).has_auth());
    }

    #[test]
    fn test_login_status_roundtrip() {
        assert_eq!("valid".parse::<LoginStatus>().unwrap(), LoginStatus::Valid);
        assert_eq!(LoginStatus::Invalid.as_str(), "invalid");
        assert!("expired".parse::<LoginStatus>().is_err());
    }
}
