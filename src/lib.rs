//! # Portero
//!
//! `portero` is a single sign-on ticket authority. A user logs in once and
//! receives a **ticket-granting ticket** (the SSO session); registered
//! applications then get single-use **service tickets** from it and redeem
//! them to learn who the user is.
//!
//! ## Login pipeline
//!
//! 1. The adaptive policy may veto the request by client IP, browser or
//!    country before any credential is looked at.
//! 2. A username of the form `surrogate+real` asks to act as `surrogate`
//!    after authenticating as `real`.
//! 3. Successful authentications are enriched with metadata (handlers,
//!    credential type, remember-me, impersonation, cached credential).
//! 4. Ranked resolvers decide the next step: success, multifactor step-up,
//!    surrogate selection or failure.
//!
//! ## Ticket lifecycle
//!
//! Tickets expire according to their policies and are swept by a periodic
//! cleaner. Destroying a ticket-granting ticket destroys everything issued
//! from it. A service ticket is consumed by exactly one validation.

pub mod cli;
pub mod sso;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
