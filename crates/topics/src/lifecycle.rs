//! Topic lifecycle flags and their provenance.
//!
//! The five flags are independent (not mutually exclusive). Each carries an
//! optional `Stamp` recording who set it and when; clearing a flag nulls the
//! stamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use deptforum_core::UserId;

/// One of the independently toggleable topic status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleFlag {
    Active,
    Closed,
    Pinned,
    Locked,
    Archived,
}

impl LifecycleFlag {
    pub const ALL: [LifecycleFlag; 5] = [
        LifecycleFlag::Active,
        LifecycleFlag::Closed,
        LifecycleFlag::Pinned,
        LifecycleFlag::Locked,
        LifecycleFlag::Archived,
    ];

    /// Flags that deny reply while set, in evaluation order.
    pub const REPLY_GATES: [LifecycleFlag; 3] = [
        LifecycleFlag::Closed,
        LifecycleFlag::Locked,
        LifecycleFlag::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleFlag::Active => "active",
            LifecycleFlag::Closed => "closed",
            LifecycleFlag::Pinned => "pinned",
            LifecycleFlag::Locked => "locked",
            LifecycleFlag::Archived => "archived",
        }
    }

    /// Human name of the state the flag describes when `on` (or off).
    pub fn state_name(&self, on: bool) -> &'static str {
        match (self, on) {
            (LifecycleFlag::Active, true) => "active",
            (LifecycleFlag::Active, false) => "inactive",
            (LifecycleFlag::Closed, true) => "closed",
            (LifecycleFlag::Closed, false) => "open",
            (LifecycleFlag::Pinned, true) => "pinned",
            (LifecycleFlag::Pinned, false) => "unpinned",
            (LifecycleFlag::Locked, true) => "locked",
            (LifecycleFlag::Locked, false) => "unlocked",
            (LifecycleFlag::Archived, true) => "archived",
            (LifecycleFlag::Archived, false) => "unarchived",
        }
    }

    pub fn blocks_reply(&self) -> bool {
        Self::REPLY_GATES.contains(self)
    }
}

impl core::fmt::Display for LifecycleFlag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who set a flag and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub actor: UserId,
    pub at: DateTime<Utc>,
}

/// A flag value plus its provenance.
///
/// `stamp` is `Some` only when the flag was turned on by an explicit action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlagState {
    pub on: bool,
    pub stamp: Option<Stamp>,
}

impl FlagState {
    pub fn off() -> Self {
        Self::default()
    }

    /// On without provenance (initial state, e.g. a topic is created active).
    pub fn on_by_default() -> Self {
        Self {
            on: true,
            stamp: None,
        }
    }

    pub fn set(&mut self, actor: UserId, at: DateTime<Utc>) {
        self.on = true;
        self.stamp = Some(Stamp { actor, at });
    }

    pub fn clear(&mut self) {
        self.on = false;
        self.stamp = None;
    }
}

/// The full set of lifecycle flags of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleFlags {
    pub active: FlagState,
    pub closed: FlagState,
    pub pinned: FlagState,
    pub locked: FlagState,
    pub archived: FlagState,
}

impl Default for LifecycleFlags {
    /// Created active, not closed, pinned, locked or archived.
    fn default() -> Self {
        Self {
            active: FlagState::on_by_default(),
            closed: FlagState::off(),
            pinned: FlagState::off(),
            locked: FlagState::off(),
            archived: FlagState::off(),
        }
    }
}

impl LifecycleFlags {
    pub fn get(&self, flag: LifecycleFlag) -> &FlagState {
        match flag {
            LifecycleFlag::Active => &self.active,
            LifecycleFlag::Closed => &self.closed,
            LifecycleFlag::Pinned => &self.pinned,
            LifecycleFlag::Locked => &self.locked,
            LifecycleFlag::Archived => &self.archived,
        }
    }

    pub fn get_mut(&mut self, flag: LifecycleFlag) -> &mut FlagState {
        match flag {
            LifecycleFlag::Active => &mut self.active,
            LifecycleFlag::Closed => &mut self.closed,
            LifecycleFlag::Pinned => &mut self.pinned,
            LifecycleFlag::Locked => &mut self.locked,
            LifecycleFlag::Archived => &mut self.archived,
        }
    }

    pub fn is_on(&self, flag: LifecycleFlag) -> bool {
        self.get(flag).on
    }

    /// First set flag that denies reply, if any.
    pub fn reply_gate(&self) -> Option<LifecycleFlag> {
        LifecycleFlag::REPLY_GATES
            .into_iter()
            .find(|flag| self.is_on(*flag))
    }
}

/// A requested change of one flag: turn it on (`set`) or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transition {
    pub flag: LifecycleFlag,
    pub set: bool,
}

impl Transition {
    pub const fn new(flag: LifecycleFlag, set: bool) -> Self {
        Self { flag, set }
    }

    pub const fn activate() -> Self {
        Self::new(LifecycleFlag::Active, true)
    }

    pub const fn deactivate() -> Self {
        Self::new(LifecycleFlag::Active, false)
    }

    pub const fn close() -> Self {
        Self::new(LifecycleFlag::Closed, true)
    }

    pub const fn reopen() -> Self {
        Self::new(LifecycleFlag::Closed, false)
    }

    pub const fn pin() -> Self {
        Self::new(LifecycleFlag::Pinned, true)
    }

    pub const fn unpin() -> Self {
        Self::new(LifecycleFlag::Pinned, false)
    }

    pub const fn lock() -> Self {
        Self::new(LifecycleFlag::Locked, true)
    }

    pub const fn unlock() -> Self {
        Self::new(LifecycleFlag::Locked, false)
    }

    pub const fn archive() -> Self {
        Self::new(LifecycleFlag::Archived, true)
    }

    pub const fn unarchive() -> Self {
        Self::new(LifecycleFlag::Archived, false)
    }

    /// Name of the state this transition leads to (e.g. "closed", "open").
    pub fn target_state(&self) -> &'static str {
        self.flag.state_name(self.set)
    }
}

impl core::fmt::Display for Transition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} -> {}", self.flag, self.target_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_a_fresh_topic() {
        let flags = LifecycleFlags::default();
        assert!(flags.is_on(LifecycleFlag::Active));
        assert!(flags.active.stamp.is_none());
        for flag in LifecycleFlag::REPLY_GATES {
            assert!(!flags.is_on(flag));
        }
        assert_eq!(flags.reply_gate(), None);
    }

    #[test]
    fn set_stamps_and_clear_nulls() {
        let mut state = FlagState::off();
        let actor = UserId::new();
        let at = Utc::now();
        state.set(actor, at);
        assert_eq!(state.stamp, Some(Stamp { actor, at }));
        state.clear();
        assert_eq!(state, FlagState::off());
    }

    #[test]
    fn reply_gate_reports_first_blocking_flag() {
        let mut flags = LifecycleFlags::default();
        flags.archived.set(UserId::new(), Utc::now());
        assert_eq!(flags.reply_gate(), Some(LifecycleFlag::Archived));
        flags.closed.set(UserId::new(), Utc::now());
        assert_eq!(flags.reply_gate(), Some(LifecycleFlag::Closed));
        flags.pinned.set(UserId::new(), Utc::now());
        assert!(!LifecycleFlag::Pinned.blocks_reply());
    }

    #[test]
    fn transitions_name_their_target_state() {
        assert_eq!(Transition::reopen().target_state(), "open");
        assert_eq!(Transition::deactivate().to_string(), "active -> inactive");
    }
}
