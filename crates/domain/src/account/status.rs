//! Account lifecycle.

use serde::{Deserialize, Serialize};

/// The status of an account.
///
/// ```text
/// Active ◄──► Frozen
///   │
///   └──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AccountStatus {
    #[default]
    Active,
    Frozen,
    /// Terminal.
    Closed,
}

impl AccountStatus {
    pub fn can_move_funds(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AccountStatus::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "Active",
            AccountStatus::Frozen => "Frozen",
            AccountStatus::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
