//! Per-user restriction records on categories and topics.
//!
//! Absence of a record means default-allow for both view and reply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use deptforum_core::{CategoryId, Entity, ForumError, ForumResult, RestrictionId, TopicId, UserId};

/// Which kind of target a restriction annotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionScope {
    Category,
    Topic,
}

impl core::fmt::Display for RestrictionScope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RestrictionScope::Category => f.write_str("category"),
            RestrictionScope::Topic => f.write_str("topic"),
        }
    }
}

/// The category or topic a restriction annotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum RestrictionTarget {
    Category(CategoryId),
    Topic(TopicId),
}

impl RestrictionTarget {
    pub fn scope(&self) -> RestrictionScope {
        match self {
            RestrictionTarget::Category(_) => RestrictionScope::Category,
            RestrictionTarget::Topic(_) => RestrictionScope::Topic,
        }
    }
}

impl core::fmt::Display for RestrictionTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RestrictionTarget::Category(id) => write!(f, "category {id}"),
            RestrictionTarget::Topic(id) => write!(f, "topic {id}"),
        }
    }
}

/// The view/reply values an explicit record supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
    pub can_view: bool,
    pub can_reply: bool,
}

impl Grant {
    pub const fn new(can_view: bool, can_reply: bool) -> Self {
        Self { can_view, can_reply }
    }
}

impl Default for Grant {
    fn default() -> Self {
        Self::new(true, true)
    }
}

/// A stored restriction record. Unique per `(target, user)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub id: RestrictionId,
    pub target: RestrictionTarget,
    pub user_id: UserId,
    pub grant: Grant,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Entity for Restriction {
    type Id = RestrictionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Request to create a restriction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRestriction {
    pub target: RestrictionTarget,
    pub user_id: UserId,
    pub grant: Grant,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl NewRestriction {
    /// Validate and turn into a record.
    ///
    /// An actor cannot restrict themselves.
    pub fn into_restriction(self, id: RestrictionId) -> ForumResult<Restriction> {
        if self.user_id == self.created_by {
            return Err(ForumError::validation("cannot restrict yourself"));
        }
        Ok(Restriction {
            id,
            target: self.target,
            user_id: self.user_id,
            grant: self.grant,
            created_by: self.created_by,
            created_at: self.occurred_at,
        })
    }
}
