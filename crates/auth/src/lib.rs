//! `deptforum-auth`: identity and registration boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod registration;
pub mod roles;
pub mod user;

pub use registration::{
    OneTimeCode, RegistrationCommand, RegistrationEvent, RegistrationRequest, RegistrationStatus,
    SubmitRegistration,
};
pub use roles::Role;
pub use user::{User, validate_handle};
