//! Topics domain module.
//!
//! Categories, topics with their lifecycle state machine, restriction
//! records and the pure access decisions combining them. No IO.

pub mod access;
pub mod category;
pub mod lifecycle;
pub mod restriction;
pub mod topic;

pub use access::{Action, AllowReason, CategoryAccess, DenyReason, TopicAccess, Verdict};
pub use category::Category;
pub use lifecycle::{FlagState, LifecycleFlag, LifecycleFlags, Stamp, Transition};
pub use restriction::{Grant, NewRestriction, Restriction, RestrictionScope, RestrictionTarget};
pub use topic::{Topic, TopicCommand, TopicEvent};
