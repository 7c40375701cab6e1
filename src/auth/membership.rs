//! Membership providers consulted in turn by the authenticator.

use std::collections::HashMap;

use async_trait::async_trait;
use libunftp::auth::AuthenticationError;

use crate::auth::user::{Account, AccountKind};
use crate::config::schema::AccountOptions;

/// User names treated as anonymous logins.
pub const ANONYMOUS_USER_NAMES: [&str; 2] = ["anonymous", "ftp"];

/// A source of accounts.
///
/// Returns `Ok(None)` when the user is unknown to this provider so the next
/// provider gets a chance.
#[async_trait]
pub trait MembershipProvider: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    async fn validate(&self, username: &str, password: Option<&str>) -> Result<Option<Account>, AuthenticationError>;
}

/// Accepts `anonymous` and `ftp`; the password is kept as the e-mail address.
#[derive(Debug, Default)]
pub struct AnonymousMembership;

#[async_trait]
impl MembershipProvider for AnonymousMembership {
    fn name(&self) -> &'static str {
        "anonymous"
    }

    async fn validate(&self, username: &str, password: Option<&str>) -> Result<Option<Account>, AuthenticationError> {
        if !ANONYMOUS_USER_NAMES
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(username))
        {
            return Ok(None);
        }

        let email = password
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(str::to_string);

        Ok(Some(Account {
            name: username.to_ascii_lowercase(),
            kind: AccountKind::Anonymous { email },
        }))
    }
}

/// Accounts declared in the settings file.
#[derive(Debug, Default)]
pub struct CustomMembership {
    passwords: HashMap<String, String>,
}

impl CustomMembership {
    pub fn new(accounts: &[AccountOptions]) -> Self {
        Self {
            passwords: accounts
                .iter()
                .map(|account| (account.name.clone(), account.password.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl MembershipProvider for CustomMembership {
    fn name(&self) -> &'static str {
        "custom"
    }

    async fn validate(&self, username: &str, password: Option<&str>) -> Result<Option<Account>, AuthenticationError> {
        let Some(expected) = self.passwords.get(username) else {
            return Ok(None);
        };

        if password != Some(expected.as_str()) {
            return Err(AuthenticationError::BadPassword);
        }

        Ok(Some(Account {
            name: username.to_string(),
            kind: AccountKind::Custom,
        }))
    }
}
