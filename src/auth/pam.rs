//! PAM membership provider.
//!
//! Only compiled with the `pam` feature; it links against the system libpam.

use async_trait::async_trait;
use libunftp::auth::{AuthenticationError, Authenticator, Credentials};
use unftp_auth_pam::PamAuthenticator;

use crate::auth::membership::MembershipProvider;
use crate::auth::user::{Account, AccountKind};
use crate::layout::passwd::SystemUserDatabase;

#[derive(Debug)]
pub struct PamMembership {
    inner: PamAuthenticator,
    account_management: bool,
}

impl PamMembership {
    pub fn new(service: &str, account_management: bool) -> Self {
        Self {
            inner: PamAuthenticator::new(service),
            account_management,
        }
    }
}

#[async_trait]
impl MembershipProvider for PamMembership {
    fn name(&self) -> &'static str {
        "pam"
    }

    async fn validate(&self, username: &str, password: Option<&str>) -> Result<Option<Account>, AuthenticationError> {
        let creds = Credentials::from(password.unwrap_or_default());
        self.inner.authenticate(username, &creds).await?;

        let entry = SystemUserDatabase.lookup(username).map_err(|e| {
            AuthenticationError::ImplPropagated("user database lookup failed".to_string(), Some(Box::new(e)))
        })?;

        if self.account_management && entry.is_none() {
            tracing::warn!(user = %username, "PAM accepted a user without a passwd record");
            return Err(AuthenticationError::BadUser);
        }

        Ok(Some(Account {
            name: username.to_string(),
            kind: AccountKind::Pam {
                uid: entry.as_ref().map(|e| e.uid),
                gid: entry.as_ref().map(|e| e.gid),
            },
        }))
    }
}
