//! Hardening
//!
//! The guardrail layer: rate limiting, pre-execution logging discipline,
//! manifest/skill verification, role enforcement, supply-chain
//! verification, the config guard, and process hardening. Grounded on the
//! teacher's `safety/` tree, generalized from "agent tool-call guardrails"
//! to the spec's broader audit/security surface.

pub mod config_guard;
pub mod facade;
pub mod manifest;
pub mod precede;
pub mod process;
pub mod rate_limiter;
pub mod role;
pub mod supply_chain;

pub use facade::SafetyFacade;
pub use precede::precede;
pub use rate_limiter::RateLimiter;
