//! Authentication mode bit flags.
//!
//! The CLI and the settings file name membership sources with tokens
//! (`custom`, `anonymous`, `pam`). Repeating the flag accumulates the sources
//! with a bitwise OR.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// A single membership source as written on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticationToken {
    /// Accounts declared in the settings file.
    Custom,
    /// `anonymous`/`ftp` logins with an e-mail as password.
    Anonymous,
    /// System accounts checked through PAM.
    Pam,
}

impl AuthenticationToken {
    const ALL: [AuthenticationToken; 3] = [
        AuthenticationToken::Custom,
        AuthenticationToken::Anonymous,
        AuthenticationToken::Pam,
    ];

    fn bit(self) -> u8 {
        match self {
            AuthenticationToken::Custom => AuthenticationMode::CUSTOM.0,
            AuthenticationToken::Anonymous => AuthenticationMode::ANONYMOUS.0,
            AuthenticationToken::Pam => AuthenticationMode::PAM.0,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            AuthenticationToken::Custom => "custom",
            AuthenticationToken::Anonymous => "anonymous",
            AuthenticationToken::Pam => "pam",
        }
    }
}

/// Set of enabled membership sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<AuthenticationToken>", into = "Vec<AuthenticationToken>")]
pub struct AuthenticationMode(u8);

impl AuthenticationMode {
    pub const NONE: AuthenticationMode = AuthenticationMode(0);
    pub const CUSTOM: AuthenticationMode = AuthenticationMode(0b001);
    pub const ANONYMOUS: AuthenticationMode = AuthenticationMode(0b010);
    pub const PAM: AuthenticationMode = AuthenticationMode(0b100);

    /// Fold a list of tokens into flags.
    pub fn from_tokens<I>(tokens: I) -> Self
    where
        I: IntoIterator<Item = AuthenticationToken>,
    {
        tokens
            .into_iter()
            .fold(Self::NONE, |mode, token| mode | Self::from(token))
    }

    pub fn contains(self, other: AuthenticationMode) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Tokens for every set flag, in declaration order.
    pub fn tokens(self) -> Vec<AuthenticationToken> {
        AuthenticationToken::ALL
            .into_iter()
            .filter(|token| self.0 & token.bit() != 0)
            .collect()
    }
}

impl From<AuthenticationToken> for AuthenticationMode {
    fn from(token: AuthenticationToken) -> Self {
        AuthenticationMode(token.bit())
    }
}

impl From<Vec<AuthenticationToken>> for AuthenticationMode {
    fn from(tokens: Vec<AuthenticationToken>) -> Self {
        Self::from_tokens(tokens)
    }
}

impl From<AuthenticationMode> for Vec<AuthenticationToken> {
    fn from(mode: AuthenticationMode) -> Self {
        mode.tokens()
    }
}

impl BitOr for AuthenticationMode {
    type Output = AuthenticationMode;

    fn bitor(self, rhs: Self) -> Self::Output {
        AuthenticationMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for AuthenticationMode {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for AuthenticationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = self.tokens().into_iter().map(AuthenticationToken::as_str).collect();
        write!(f, "{}", names.join("|"))
    }
}
