//! Registration request aggregate.
//!
//! New members cannot sign up directly. They submit a request, an admin
//! approves it (which issues a one-time code delivered out of band) or
//! rejects it, and the applicant redeems the code to obtain an approved
//! account.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use deptforum_core::{Aggregate, AggregateRoot, ForumError, RegistrationId, UserId};
use deptforum_events::Event;

use crate::{Role, User, validate_handle};

const CODE_DIGITS: usize = 6;
const CODE_SPACE: u32 = 1_000_000;

// ─────────────────────────────────────────────────────────────────────────────
// One-time code
// ─────────────────────────────────────────────────────────────────────────────

/// A six-digit verification code with an expiry window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimeCode {
    pub code: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OneTimeCode {
    /// Issue a fresh random code valid for `ttl` from `generated_at`.
    pub fn issue(generated_at: DateTime<Utc>, ttl: Duration) -> Self {
        let n = rand::random_range(0..CODE_SPACE);
        Self::with_code(format!("{n:0width$}", width = CODE_DIGITS), generated_at, ttl)
    }

    pub fn with_code(code: impl Into<String>, generated_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            code: code.into(),
            generated_at,
            expires_at: generated_at + ttl,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl core::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RegistrationStatus::Pending => write!(f, "pending"),
            RegistrationStatus::Approved => write!(f, "approved"),
            RegistrationStatus::Rejected => write!(f, "rejected"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// Registration request for a prospective member.
///
/// # Invariants
/// - Only a `Pending` request can be approved or rejected.
/// - A code exists only while the request is `Approved` and not yet redeemed.
/// - Redeeming requires a matching code before `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub id: RegistrationId,
    pub handle: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub department: String,
    pub status: RegistrationStatus,
    pub one_time_code: Option<OneTimeCode>,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub admin_notes: String,
    pub created_at: DateTime<Utc>,
    pub version: u64,
    created: bool,
}

impl RegistrationRequest {
    /// Create an empty, not-yet-submitted aggregate instance.
    pub fn empty(id: RegistrationId) -> Self {
        Self {
            id,
            handle: String::new(),
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            department: String::new(),
            status: RegistrationStatus::Pending,
            one_time_code: None,
            reviewed_by: None,
            reviewed_at: None,
            admin_notes: String::new(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            version: 0,
            created: false,
        }
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Build the approved regular account granted by a redeemed request.
    pub fn to_user(&self, user_id: UserId, created_at: DateTime<Utc>) -> Result<User, ForumError> {
        let display_name = format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string();
        Ok(User::new(user_id, self.handle.clone(), Role::Regular, created_at)?
            .with_email(self.email.clone())
            .with_display_name(display_name)
            .with_department(self.department.clone())
            .approved())
    }

    fn ensure_created(&self) -> Result<(), ForumError> {
        if !self.created {
            return Err(ForumError::not_found("registration request", self.id));
        }
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), ForumError> {
        if self.status != RegistrationStatus::Pending {
            return Err(ForumError::already_in_state(format!(
                "registration request is already {}",
                self.status
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for RegistrationRequest {
    type Id = RegistrationId;

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
pub struct SubmitRegistration {
    pub handle: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub department: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationCommand {
    Submit(SubmitRegistration),
    Approve {
        reviewer_id: UserId,
        reviewer_role: Role,
        code: OneTimeCode,
        occurred_at: DateTime<Utc>,
    },
    Reject {
        reviewer_id: UserId,
        reviewer_role: Role,
        notes: String,
        occurred_at: DateTime<Utc>,
    },
    Redeem {
        code: String,
        occurred_at: DateTime<Utc>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationEvent {
    Submitted(SubmitRegistration),
    Approved {
        reviewer_id: UserId,
        code: OneTimeCode,
        occurred_at: DateTime<Utc>,
    },
    Rejected {
        reviewer_id: UserId,
        notes: String,
        occurred_at: DateTime<Utc>,
    },
    Redeemed {
        occurred_at: DateTime<Utc>,
    },
}

impl Event for RegistrationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RegistrationEvent::Submitted(_) => "auth.registration.submitted",
            RegistrationEvent::Approved { .. } => "auth.registration.approved",
            RegistrationEvent::Rejected { .. } => "auth.registration.rejected",
            RegistrationEvent::Redeemed { .. } => "auth.registration.redeemed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RegistrationEvent::Submitted(e) => e.occurred_at,
            RegistrationEvent::Approved { occurred_at, .. }
            | RegistrationEvent::Rejected { occurred_at, .. }
            | RegistrationEvent::Redeemed { occurred_at } => *occurred_at,
        }
    }
}

impl Aggregate for RegistrationRequest {
    type Command = RegistrationCommand;
    type Event = RegistrationEvent;
    type Error = ForumError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RegistrationEvent::Submitted(e) => {
                self.handle = e.handle.clone();
                self.email = e.email.clone();
                self.first_name = e.first_name.clone();
                self.last_name = e.last_name.clone();
                self.department = e.department.clone();
                self.status = RegistrationStatus::Pending;
                self.created_at = e.occurred_at;
                self.created = true;
            }
            RegistrationEvent::Approved {
                reviewer_id,
                code,
                occurred_at,
            } => {
                self.status = RegistrationStatus::Approved;
                self.reviewed_by = Some(*reviewer_id);
                self.reviewed_at = Some(*occurred_at);
                self.one_time_code = Some(code.clone());
            }
            RegistrationEvent::Rejected {
                reviewer_id,
                notes,
                occurred_at,
            } => {
                self.status = RegistrationStatus::Rejected;
                self.reviewed_by = Some(*reviewer_id);
                self.reviewed_at = Some(*occurred_at);
                self.admin_notes = notes.clone();
            }
            RegistrationEvent::Redeemed { .. } => {
                self.one_time_code = None;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RegistrationCommand::Submit(cmd) => self.handle_submit(cmd),
            RegistrationCommand::Approve {
                reviewer_id,
                reviewer_role,
                code,
                occurred_at,
            } => {
                self.ensure_created()?;
                ensure_reviewer(*reviewer_role)?;
                self.ensure_pending()?;
                Ok(vec![RegistrationEvent::Approved {
                    reviewer_id: *reviewer_id,
                    code: code.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            RegistrationCommand::Reject {
                reviewer_id,
                reviewer_role,
                notes,
                occurred_at,
            } => {
                self.ensure_created()?;
                ensure_reviewer(*reviewer_role)?;
                self.ensure_pending()?;
                Ok(vec![RegistrationEvent::Rejected {
                    reviewer_id: *reviewer_id,
                    notes: notes.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            RegistrationCommand::Redeem { code, occurred_at } => {
                self.handle_redeem(code, *occurred_at)
            }
        }
    }
}

impl RegistrationRequest {
    fn handle_submit(&self, cmd: &SubmitRegistration) -> Result<Vec<RegistrationEvent>, ForumError> {
        if self.created {
            return Err(ForumError::already_exists(format!(
                "registration request {} already submitted",
                self.id
            )));
        }
        validate_handle(&cmd.handle)?;
        if !cmd.email.contains('@') {
            return Err(ForumError::validation("email must contain '@'"));
        }
        if cmd.first_name.trim().is_empty() || cmd.last_name.trim().is_empty() {
            return Err(ForumError::validation("first and last name are required"));
        }
        if cmd.department.trim().is_empty() {
            return Err(ForumError::validation("department is required"));
        }
        Ok(vec![RegistrationEvent::Submitted(cmd.clone())])
    }

    fn handle_redeem(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RegistrationEvent>, ForumError> {
        self.ensure_created()?;
        if self.status != RegistrationStatus::Approved {
            return Err(ForumError::not_found("approved registration", &self.handle));
        }
        let issued = match &self.one_time_code {
            Some(issued) if issued.code == code => issued,
            _ => {
                return Err(ForumError::permission_denied(
                    "invalid handle or verification code",
                ));
            }
        };
        if !issued.is_valid_at(now) {
            return Err(ForumError::validation("verification code has expired"));
        }
        Ok(vec![RegistrationEvent::Redeemed { occurred_at: now }])
    }
}

fn ensure_reviewer(role: Role) -> Result<(), ForumError> {
    if !role.is_admin() {
        return Err(ForumError::permission_denied(
            "only admins can review registration requests",
        ));
    }
    Ok(())
}
