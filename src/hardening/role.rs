//! Role / Capability Enforcer
//!
//! Strict ladder `user < operator < approver < admin` (spec §4.10),
//! expressed as a derived `PartialOrd` enum — the idiomatic Rust shape for
//! "role ladder" the teacher reaches for elsewhere with `#[derive(Ord)]`
//! enums. Escalation detectors are pure functions over a request
//! description, mirroring `safety/command.rs`'s pure
//! `is_known_safe_command`/`is_dangerous_command` style.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Operator,
    Approver,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleGrant {
    pub user_id: String,
    pub role: Role,
    pub scopes: HashSet<String>,
}

/// A single request description handed to the escalation detectors. This
/// stays a plain struct, not a trait hierarchy, per the no-class-hierarchy
/// design note.
#[derive(Debug, Clone)]
pub struct RequestDescription<'a> {
    pub actor_role: Role,
    pub requested_capabilities: &'a [String],
    pub granted_capabilities: &'a HashSet<String>,
    pub tool_name: Option<&'a str>,
    pub execution_target: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationFlag {
    IllegalCapabilityAddition(String),
    DangerousToolBelowAdmin(String),
    ContainerEscapeAttempt,
    GatewayHostExecution,
}

const DANGEROUS_TOOLS: &[&str] = &["exec", "shell", "eval", "compile"];

/// Run all four escalation detectors from spec §4.10 over one request.
pub fn detect_escalation(req: &RequestDescription) -> Vec<EscalationFlag> {
    let mut flags = Vec::new();

    for cap in req.requested_capabilities {
        if !req.granted_capabilities.contains(cap) {
            flags.push(EscalationFlag::IllegalCapabilityAddition(cap.clone()));
        }
    }

    if let Some(tool) = req.tool_name {
        if DANGEROUS_TOOLS.contains(&tool) && req.actor_role < Role::Admin {
            flags.push(EscalationFlag::DangerousToolBelowAdmin(tool.to_string()));
        }
    }

    if let Some(target) = req.execution_target {
        if target != "configured-container" && req.actor_role != Role::Admin {
            flags.push(EscalationFlag::ContainerEscapeAttempt);
        }
        if target == "gateway-host" {
            flags.push(EscalationFlag::GatewayHostExecution);
        }
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ladder_is_strict() {
        assert!(Role::User < Role::Operator);
        assert!(Role::Operator < Role::Approver);
        assert!(Role::Approver < Role::Admin);
    }

    #[test]
    fn flags_dangerous_tool_below_admin() {
        let granted = HashSet::new();
        let req = RequestDescription {
            actor_role: Role::Operator,
            requested_capabilities: &[],
            granted_capabilities: &granted,
            tool_name: Some("shell"),
            execution_target: None,
        };
        let flags = detect_escalation(&req);
        assert!(flags.contains(&EscalationFlag::DangerousToolBelowAdmin("shell".to_string())));
    }

    #[test]
    fn flags_gateway_host_execution() {
        let granted = HashSet::new();
        let req = RequestDescription {
            actor_role: Role::Admin,
            requested_capabilities: &[],
            granted_capabilities: &granted,
            tool_name: None,
            execution_target: Some("gateway-host"),
        };
        let flags = detect_escalation(&req);
        assert!(flags.contains(&EscalationFlag::GatewayHostExecution));
    }

    #[test]
    fn flags_illegal_capability_addition() {
        let granted: HashSet<String> = ["read".to_string()].into_iter().collect();
        let requested = vec!["read".to_string(), "admin-override".to_string()];
        let req = RequestDescription {
            actor_role: Role::User,
            requested_capabilities: &requested,
            granted_capabilities: &granted,
            tool_name: None,
            execution_target: None,
        };
        let flags = detect_escalation(&req);
        assert_eq!(
            flags,
            vec![EscalationFlag::IllegalCapabilityAddition("admin-override".to_string())]
        );
    }
}
