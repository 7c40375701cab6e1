//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! USER/PASS from libunftp
//!     → FtpAuthenticator
//!     → membership providers enabled by AuthenticationMode (anonymous, custom, pam)
//!     → AccountDirectoryQuery (layout)
//!     → FtpUser { account, root, home }
//! ```
//!
//! # Design Decisions
//! - Providers are consulted in a fixed order; the first one that knows the user decides
//! - A provider that knows the user but rejects the password ends the chain

pub mod membership;
pub mod mode;
#[cfg(feature = "pam")]
pub mod pam;
pub mod user;

use std::sync::Arc;

use async_trait::async_trait;
use libunftp::auth::{AuthenticationError, Authenticator, Credentials};
use thiserror::Error;

use crate::config::schema::Options;
use crate::layout::AccountDirectoryQuery;

pub use membership::{AnonymousMembership, CustomMembership, MembershipProvider};
pub use mode::{AuthenticationMode, AuthenticationToken};
pub use user::{Account, AccountKind, FtpUser};

/// Errors raised while assembling the membership chain.
#[derive(Debug, Error)]
pub enum AuthSetupError {
    #[error("PAM authentication requested but this build has no PAM support (enable the `pam` feature)")]
    PamUnavailable,

    #[error("no authentication source enabled")]
    NoSources,
}

/// libunftp authenticator backed by the configured membership providers.
#[derive(Debug)]
pub struct FtpAuthenticator {
    providers: Vec<Box<dyn MembershipProvider>>,
    directories: Arc<dyn AccountDirectoryQuery>,
}

impl FtpAuthenticator {
    pub fn new(providers: Vec<Box<dyn MembershipProvider>>, directories: Arc<dyn AccountDirectoryQuery>) -> Self {
        Self { providers, directories }
    }

    /// Assemble the provider chain for the enabled authentication sources.
    pub fn from_options(options: &Options, directories: Arc<dyn AccountDirectoryQuery>) -> Result<Self, AuthSetupError> {
        let mode = options.authentication;
        if mode.is_empty() {
            return Err(AuthSetupError::NoSources);
        }

        let mut providers: Vec<Box<dyn MembershipProvider>> = Vec::new();
        if mode.contains(AuthenticationMode::ANONYMOUS) {
            providers.push(Box::new(AnonymousMembership));
        }
        if mode.contains(AuthenticationMode::CUSTOM) {
            providers.push(Box::new(CustomMembership::new(&options.accounts)));
        }
        if mode.contains(AuthenticationMode::PAM) {
            providers.push(pam_provider(options)?);
        }

        tracing::debug!(
            authentication = %mode,
            providers = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Membership providers configured"
        );

        Ok(Self::new(providers, directories))
    }

    /// Validate a login and resolve the user's directories.
    pub async fn login(&self, username: &str, password: Option<&str>) -> Result<FtpUser, AuthenticationError> {
        for provider in &self.providers {
            let Some(account) = provider.validate(username, password).await? else {
                continue;
            };

            let directories = self.directories.directories(&account).map_err(|e| {
                tracing::warn!(user = %username, error = %e, "Could not resolve account directories");
                AuthenticationError::ImplPropagated("account directories unavailable".to_string(), Some(Box::new(e)))
            })?;

            let user = FtpUser::new(account, directories);
            tracing::info!(
                user = %user,
                provider = provider.name(),
                root = %user.root.display(),
                "User authenticated"
            );
            return Ok(user);
        }

        tracing::debug!(user = %username, "No membership provider knows this user");
        Err(AuthenticationError::BadUser)
    }
}

#[async_trait]
impl Authenticator<FtpUser> for FtpAuthenticator {
    async fn authenticate(&self, username: &str, creds: &Credentials) -> Result<FtpUser, AuthenticationError> {
        self.login(username, creds.password.as_deref()).await
    }
}

#[cfg(feature = "pam")]
fn pam_provider(options: &Options) -> Result<Box<dyn MembershipProvider>, AuthSetupError> {
    Ok(Box::new(pam::PamMembership::new(
        &options.pam.service,
        !options.pam.no_account_management,
    )))
}

#[cfg(not(feature = "pam"))]
fn pam_provider(_options: &Options) -> Result<Box<dyn MembershipProvider>, AuthSetupError> {
    Err(AuthSetupError::PamUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{RootPerUserQuery, SingleRootQuery};
    use std::path::PathBuf;

    fn options(mode: AuthenticationMode) -> Options {
        Options {
            authentication: mode,
            ..Options::default()
        }
    }

    #[tokio::test]
    async fn custom_account_logs_in() {
        let auth = FtpAuthenticator::from_options(&options(AuthenticationMode::CUSTOM), Arc::new(SingleRootQuery)).unwrap();
        let user = auth.login("tester", Some("testing")).await.unwrap();
        assert_eq!(user.name(), "tester");
        assert_eq!(user.root, PathBuf::new());
    }

    #[tokio::test]
    async fn anonymous_requires_flag() {
        let auth = FtpAuthenticator::from_options(&options(AuthenticationMode::CUSTOM), Arc::new(SingleRootQuery)).unwrap();
        assert!(matches!(
            auth.login("anonymous", Some("a@b.c")).await,
            Err(AuthenticationError::BadUser)
        ));
    }

    #[tokio::test]
    async fn custom_ftp_account_without_anonymous() {
        let mut options = options(AuthenticationMode::CUSTOM);
        options.accounts = vec![crate::config::schema::AccountOptions {
            name: "ftp".into(),
            password: "secret".into(),
        }];
        let auth = FtpAuthenticator::from_options(&options, Arc::new(SingleRootQuery)).unwrap();

        let user = auth.login("ftp", Some("secret")).await.unwrap();
        assert!(!user.is_anonymous());
        assert!(auth.login("ftp", Some("a@b.c")).await.is_err());
    }

    #[tokio::test]
    async fn anonymous_root_per_email() {
        let mode = AuthenticationMode::CUSTOM | AuthenticationMode::ANONYMOUS;
        let auth = FtpAuthenticator::from_options(&options(mode), Arc::new(RootPerUserQuery)).unwrap();
        let user = auth.login("anonymous", Some("a@b.c")).await.unwrap();
        assert!(user.is_anonymous());
        assert_eq!(user.root, PathBuf::from("anonymous/a@b.c"));
    }

    #[test]
    fn empty_mode_is_rejected() {
        let err = FtpAuthenticator::from_options(&options(AuthenticationMode::NONE), Arc::new(SingleRootQuery)).unwrap_err();
        assert!(matches!(err, AuthSetupError::NoSources));
    }

    #[cfg(not(feature = "pam"))]
    #[test]
    fn pam_needs_feature() {
        let err = FtpAuthenticator::from_options(&options(AuthenticationMode::PAM), Arc::new(SingleRootQuery)).unwrap_err();
        assert!(matches!(err, AuthSetupError::PamUnavailable));
    }
}
