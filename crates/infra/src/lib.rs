//! Infrastructure layer: stores, application services and configuration.
//!
//! Services own the request-level orchestration (load, decide, persist) and
//! are generic over a [`store::ForumStore`]. All decisions are delegated to
//! the pure domain crates.

pub mod config;
pub mod directory;
pub mod ledger;
pub mod lifecycle;
pub mod permissions;
pub mod registration;
pub mod restrictions;
pub mod store;


pub use config::ForumConfig;
pub use directory::TopicDirectory;
pub use ledger::ActivityLedger;
pub use lifecycle::{BulkTransitionReport, LifecycleService};
pub use permissions::{AccessIndex, PermissionResolver, Target};
pub use registration::RegistrationService;
pub use restrictions::RestrictionService;
pub use store::{ForumStore, InMemoryForumStore, PostgresForumStore, UserRestrictions};
