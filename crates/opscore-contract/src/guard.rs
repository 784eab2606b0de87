// crates/opscore-contract/src/guard.rs
// ============================================================================
// Module: Request Guards
// Description: The three checks spec §4.11 requires before any command body
//              runs: schema version, workspace scoping, principal identity.
// Purpose: Give `opscore-engine` one ordered call sequence to run ahead of
//          every command, matching the teacher's gate-before-evaluate shape
//          in `opscore-policy::authorize`.
// Dependencies: crate::{error, reason_code}
// ============================================================================

use crate::ContractError;
use crate::ReasonCode;

/// Rejects a request whose `schema_version` is not `supported`.
///
/// # Errors
///
/// Returns [`ReasonCode::UnsupportedVersion`] when `requested != supported`.
pub fn assert_supported_schema_version(requested: u32, supported: u32) -> Result<(), ContractError> {
    if requested != supported {
        return Err(ContractError::new(
            ReasonCode::UnsupportedVersion,
            format!("schema_version {requested} is not supported (expected {supported})"),
        ));
    }
    Ok(())
}

/// Rejects a request with no `x-workspace-id` header, or whose header
/// disagrees with a workspace id named in the body.
///
/// # Errors
///
/// Returns [`ReasonCode::MissingWorkspaceHeader`] when `header` is absent,
/// or [`ReasonCode::UnauthorizedWorkspace`] when `header` and
/// `body_workspace_id` are both present but differ.
pub fn assert_workspace_header<'a>(
    header: Option<&'a str>,
    body_workspace_id: Option<&str>,
) -> Result<&'a str, ContractError> {
    let Some(header) = header.filter(|value| !value.is_empty()) else {
        return Err(ContractError::new(ReasonCode::MissingWorkspaceHeader, "x-workspace-id header is required"));
    };
    if let Some(body_value) = body_workspace_id {
        if body_value != header {
            return Err(ContractError::new(
                ReasonCode::UnauthorizedWorkspace,
                format!("x-workspace-id header ({header}) does not match body workspace_id ({body_value})"),
            ));
        }
    }
    Ok(header)
}

/// Rejects a request where the authenticated principal does not match an
/// agent identity the body itself claims to act as.
///
/// # Errors
///
/// Returns [`ReasonCode::UnauthorizedWorkspace`] when both are present and differ.
pub fn assert_principal_matches_claim(
    authenticated_principal_id: &str,
    claimed_agent_id: Option<&str>,
) -> Result<(), ContractError> {
    if let Some(claimed) = claimed_agent_id {
        if claimed != authenticated_principal_id {
            return Err(ContractError::new(
                ReasonCode::UnauthorizedWorkspace,
                format!("authenticated principal {authenticated_principal_id} may not act as {claimed}"),
            ));
        }
    }
    Ok(())
}

/// Rejects a request missing a field required by the command it names.
///
/// # Errors
///
/// Returns [`ReasonCode::MissingRequiredField`] when `value` is `None`.
pub fn require_field<'a>(value: Option<&'a str>, field_name: &str) -> Result<&'a str, ContractError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ContractError::new(ReasonCode::MissingRequiredField, format!("missing required field: {field_name}")))
}

/// Verifies the `x-engine-id`/`x-engine-token` pair an engine presents,
/// since `opscore-leases` explicitly defers engine-token authorization to
/// its caller. The expected token is `hash({engine_id, signing_secret})`;
/// an engine that knows the shared secret can derive it, but a caller that
/// only observes a prior token cannot forge one for a different engine id.
///
/// # Errors
///
/// Returns [`ReasonCode::UnauthorizedWorkspace`] when the presented token
/// does not match, or [`ReasonCode::InternalError`] if the expected token
/// cannot be computed.
pub fn verify_engine_token(engine_id: &str, token: &str, signing_secret: &str) -> Result<(), ContractError> {
    let expected = opscore_core::hashing::hash_value(&(engine_id, signing_secret))
        .map_err(|err| ContractError::new(ReasonCode::InternalError, err.to_string()))?;
    if expected.as_str() != token {
        return Err(ContractError::new(ReasonCode::UnauthorizedWorkspace, "engine token does not match engine id"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_version_mismatch_is_rejected() {
        let err = assert_supported_schema_version(2, 1).unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::UnsupportedVersion);
    }

    #[test]
    fn missing_workspace_header_is_rejected() {
        let err = assert_workspace_header(None, None).unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::MissingWorkspaceHeader);
    }

    #[test]
    fn mismatched_workspace_header_and_body_is_rejected() {
        let err = assert_workspace_header(Some("ws-1"), Some("ws-2")).unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::UnauthorizedWorkspace);
    }

    #[test]
    fn matching_workspace_header_and_body_passes() {
        assert_eq!(assert_workspace_header(Some("ws-1"), Some("ws-1")).unwrap(), "ws-1");
    }

    #[test]
    fn header_alone_passes_without_a_body_claim() {
        assert_eq!(assert_workspace_header(Some("ws-1"), None).unwrap(), "ws-1");
    }

    #[test]
    fn principal_mismatch_is_rejected() {
        let err = assert_principal_matches_claim("agent-1", Some("agent-2")).unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::UnauthorizedWorkspace);
    }

    #[test]
    fn missing_field_is_rejected() {
        let err = require_field(None, "title").unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::MissingRequiredField);
    }

    #[test]
    fn engine_token_derived_from_the_secret_verifies() {
        let token = opscore_core::hashing::hash_value(&("engine-1", "secret")).unwrap().as_str().to_string();
        verify_engine_token("engine-1", &token, "secret").unwrap();
    }

    #[test]
    fn engine_token_for_a_different_engine_id_is_rejected() {
        let token = opscore_core::hashing::hash_value(&("engine-1", "secret")).unwrap().as_str().to_string();
        let err = verify_engine_token("engine-2", &token, "secret").unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::UnauthorizedWorkspace);
    }
}
