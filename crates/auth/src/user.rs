//! Forum user identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use deptforum_core::{Entity, ForumError, ForumResult, UserId};

use crate::Role;

const MAX_HANDLE_LEN: usize = 150;

/// A forum user.
///
/// # Invariants
/// - `handle` is unique across users (enforced by the store) and well-formed.
/// - `Role::Admin` grants the restriction bypass regardless of `approved`;
///   `approved` only gates login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub handle: String,
    pub email: String,
    pub display_name: String,
    pub department: Option<String>,
    pub role: Role,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Build a user with a validated handle. New users start unapproved.
    pub fn new(
        id: UserId,
        handle: impl Into<String>,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> ForumResult<Self> {
        let handle = handle.into();
        validate_handle(&handle)?;
        Ok(Self {
            id,
            handle,
            email: String::new(),
            display_name: String::new(),
            department: None,
            role,
            approved: false,
            created_at,
        })
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn approved(mut self) -> Self {
        self.approved = true;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Login gate: approved users and admins may authenticate.
    pub fn can_log_in(&self) -> bool {
        self.approved || self.is_admin()
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Validate a user handle: 1..=150 chars of letters, digits and `@.+-_`.
pub fn validate_handle(handle: &str) -> ForumResult<()> {
    if handle.is_empty() {
        return Err(ForumError::validation("handle cannot be empty"));
    }
    if handle.chars().count() > MAX_HANDLE_LEN {
        return Err(ForumError::validation(format!(
            "handle cannot exceed {MAX_HANDLE_LEN} characters"
        )));
    }
    if let Some(c) = handle
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_')))
    {
        return Err(ForumError::validation(format!(
            "handle contains invalid character '{c}'"
        )));
    }
    Ok(())
}
