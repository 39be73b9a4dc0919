//! Topic aggregate: lifecycle state machine plus activity counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use deptforum_auth::Role;
use deptforum_core::{Aggregate, AggregateRoot, CategoryId, ForumError, ForumResult, TopicId, UserId};
use deptforum_events::Event;

use crate::lifecycle::{LifecycleFlag, LifecycleFlags, Transition};

const MAX_TITLE_LEN: usize = 200;

/// Aggregate root: Topic.
///
/// # Invariants
/// - `total_messages` equals the number of messages stored for the topic.
/// - `last_activity >= created_at` and never decreases.
/// - Every flag transition is an explicit admin action; re-applying a
///   transition to a flag already in that state is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub category_id: CategoryId,
    pub title: String,
    pub description: Option<String>,
    pub owner: UserId,
    pub flags: LifecycleFlags,
    pub total_messages: u64,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Number of lifecycle events applied since creation.
    pub version: u64,
}

impl Topic {
    /// Create a topic: active, not closed/pinned/locked/archived, counters zero.
    pub fn new(
        id: TopicId,
        category_id: CategoryId,
        title: impl Into<String>,
        description: Option<String>,
        owner: UserId,
        created_at: DateTime<Utc>,
    ) -> ForumResult<Self> {
        let title = title.into().trim().to_string();
        if title.is_empty() {
            return Err(ForumError::validation("topic title cannot be empty"));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(ForumError::validation(format!(
                "topic title cannot exceed {MAX_TITLE_LEN} characters"
            )));
        }
        Ok(Self {
            id,
            category_id,
            title,
            description: description.filter(|d| !d.trim().is_empty()),
            owner,
            flags: LifecycleFlags::default(),
            total_messages: 0,
            last_activity: created_at,
            created_at,
            version: 0,
        })
    }

    pub fn is_active(&self) -> bool {
        self.flags.is_on(LifecycleFlag::Active)
    }

    pub fn is_closed(&self) -> bool {
        self.flags.is_on(LifecycleFlag::Closed)
    }

    pub fn is_pinned(&self) -> bool {
        self.flags.is_on(LifecycleFlag::Pinned)
    }

    pub fn is_locked(&self) -> bool {
        self.flags.is_on(LifecycleFlag::Locked)
    }

    pub fn is_archived(&self) -> bool {
        self.flags.is_on(LifecycleFlag::Archived)
    }

    /// Account for one accepted message.
    ///
    /// Stores call this inside the same unit of work as the message insert.
    pub fn record_message(&mut self, at: DateTime<Utc>) {
        self.total_messages += 1;
        if at > self.last_activity {
            self.last_activity = at;
        }
    }

    /// Case-insensitive match on title or description.
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
    }
}

impl AggregateRoot for Topic {
    type Id = TopicId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopicCommand {
    /// Set or clear one lifecycle flag.
    Transition {
        transition: Transition,
        actor_id: UserId,
        actor_role: Role,
        occurred_at: DateTime<Utc>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Typed transition records; the audit trail of a topic's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopicEvent {
    FlagSet {
        topic_id: TopicId,
        flag: LifecycleFlag,
        actor_id: UserId,
        occurred_at: DateTime<Utc>,
    },
    FlagCleared {
        topic_id: TopicId,
        flag: LifecycleFlag,
        actor_id: UserId,
        occurred_at: DateTime<Utc>,
    },
}

impl TopicEvent {
    pub fn flag(&self) -> LifecycleFlag {
        match self {
            TopicEvent::FlagSet { flag, .. } | TopicEvent::FlagCleared { flag, .. } => *flag,
        }
    }

    pub fn actor_id(&self) -> UserId {
        match self {
            TopicEvent::FlagSet { actor_id, .. } | TopicEvent::FlagCleared { actor_id, .. } => {
                *actor_id
            }
        }
    }
}

impl Event for TopicEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TopicEvent::FlagSet { .. } => "topics.topic.flag_set",
            TopicEvent::FlagCleared { .. } => "topics.topic.flag_cleared",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TopicEvent::FlagSet { occurred_at, .. } | TopicEvent::FlagCleared { occurred_at, .. } => {
                *occurred_at
            }
        }
    }
}

impl Aggregate for Topic {
    type Command = TopicCommand;
    type Event = TopicEvent;
    type Error = ForumError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TopicEvent::FlagSet {
                flag,
                actor_id,
                occurred_at,
                ..
            } => self.flags.get_mut(*flag).set(*actor_id, *occurred_at),
            TopicEvent::FlagCleared { flag, .. } => self.flags.get_mut(*flag).clear(),
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TopicCommand::Transition {
                transition,
                actor_id,
                actor_role,
                occurred_at,
            } => self.handle_transition(*transition, *actor_id, *actor_role, *occurred_at),
        }
    }
}

impl Topic {
    fn handle_transition(
        &self,
        transition: Transition,
        actor_id: UserId,
        actor_role: Role,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<TopicEvent>, ForumError> {
        if !actor_role.is_admin() {
            return Err(ForumError::permission_denied(format!(
                "only admins can mark a topic {}",
                transition.target_state()
            )));
        }
        if self.flags.is_on(transition.flag) == transition.set {
            return Err(ForumError::already_in_state(format!(
                "topic {} is already {}",
                self.id,
                transition.target_state()
            )));
        }

        let event = if transition.set {
            TopicEvent::FlagSet {
                topic_id: self.id,
                flag: transition.flag,
                actor_id,
                occurred_at,
            }
        } else {
            TopicEvent::FlagCleared {
                topic_id: self.id,
                flag: transition.flag,
                actor_id,
                occurred_at,
            }
        };
        Ok(vec![event])
    }
}
