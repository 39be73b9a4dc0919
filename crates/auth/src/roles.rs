use core::str::FromStr;

use serde::{Deserialize, Serialize};

use deptforum_core::ForumError;

/// Role of a forum user.
///
/// `Admin` bypasses every restriction-record lookup. It never bypasses the
/// topic status gates (closed/locked/archived) on reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Regular,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Regular => "regular",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ForumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "regular" | "user" => Ok(Role::Regular),
            "admin" => Ok(Role::Admin),
            other => Err(ForumError::validation(format!(
                "role must be one of: regular, admin (got '{other}')"
            ))),
        }
    }
}
