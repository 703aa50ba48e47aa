//! Domain services used by the HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the sign-up state machine, identity storage and
//! the outbound backend calls, so route handlers stay focused on protocol
//! translation and cookie plumbing.

pub mod auth;
pub mod identity;
pub mod provisioning;
pub mod session;
pub mod signup;
pub mod signup_session;
pub mod user_sync;
