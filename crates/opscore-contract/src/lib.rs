// crates/opscore-contract/src/lib.rs
// ============================================================================
// Module: Ops Core Contract Layer
// Description: Request gating, the fixed reason-code table, the typed
//              command surface, and idempotency-key synthesis (C11).
// Purpose: Give the engine façade and the CLI one shared, wire-format-free
//          vocabulary for what a caller is asking for and how a failure is
//          reported back to them.
// Dependencies: crate::{guard, reason_code, error, command, config, idempotency}
// ============================================================================

//! ## Overview
//! `opscore-contract` knows nothing about HTTP routing or the domain
//! crates' storage layers; it exposes the three checks every command runs
//! through before its body is evaluated ([`guard`]), the fixed
//! `{reason_code, message, details}` error shape every command can fail
//! with ([`error`], [`reason_code`]), the typed request/response surface
//! ([`command`]), process configuration ([`config`]), and the centralized
//! idempotency-key builder ([`idempotency`]).

pub mod command;
pub mod config;
pub mod error;
pub mod guard;
pub mod idempotency;
pub mod reason_code;

pub use command::Command;
pub use command::Envelope as CommandEnvelope;
pub use config::ConfigError;
pub use config::EngineConfig;
pub use error::ContractError;
pub use error::to_response_body;
pub use guard::assert_principal_matches_claim;
pub use guard::assert_supported_schema_version;
pub use guard::assert_workspace_header;
pub use guard::require_field;
pub use guard::verify_engine_token;
pub use idempotency::CommandKind;
pub use idempotency::build_key;
pub use reason_code::ReasonCode;
