//! Security state guarding the control channel
//!
//! The lockout and revocation guards are plain in-memory state machines
//! with process lifetime: constructed once at startup and shared into the
//! authentication handlers via `Arc`, never as module globals.

pub mod lockout;
pub mod password;
pub mod revocation;
pub mod tokens;

pub use lockout::{LOCKOUT_DURATION_MINUTES, LockoutGuard, MAX_FAILED_ATTEMPTS};
pub use password::{PasswordHasher, Sha256Hasher, validate_complexity};
pub use revocation::RevocationGuard;
pub use tokens::{Claims, TokenIssuer, generate_node_token};
