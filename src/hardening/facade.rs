//! Safety Facade
//!
//! Composes the rate limiter, manifest verifier, role enforcer, and
//! supply-chain verifier behind one call surface, grounded on the
//! teacher's `SafetyGuard` composition pattern (`safety/mod.rs`), which
//! combined a `RateLimiter` and a `ContentFilter` the same way.

use std::sync::Arc;

use crate::error::AgencyResult;
use crate::hardening::manifest::{ManifestVerifier, SkillManifest, VerificationOutcome};
use crate::hardening::rate_limiter::RateLimiter;
use crate::hardening::role::{detect_escalation, EscalationFlag, RequestDescription};
use crate::hardening::supply_chain::{ArtifactDescriptor, SupplyChainVerifier, VerificationFailure};

pub struct SafetyFacade {
    pub rate_limiter: Arc<RateLimiter>,
    pub manifest_verifier: ManifestVerifier,
    pub supply_chain_verifier: SupplyChainVerifier,
}

impl SafetyFacade {
    pub fn new(rate_limiter: Arc<RateLimiter>, manifest_verifier: ManifestVerifier, supply_chain_verifier: SupplyChainVerifier) -> Self {
        Self {
            rate_limiter,
            manifest_verifier,
            supply_chain_verifier,
        }
    }

    pub async fn check_rate_limit(&self, client_id: &str) -> AgencyResult<()> {
        self.rate_limiter.check(client_id).await
    }

    pub fn verify_skill(&self, manifest: &SkillManifest) -> VerificationOutcome {
        self.manifest_verifier.verify(manifest)
    }

    pub fn verify_artifact_checksum(&self, descriptor: &ArtifactDescriptor, bytes: &[u8]) -> Result<(), VerificationFailure> {
        self.supply_chain_verifier.verify_checksum(descriptor, bytes)
    }

    pub fn escalation_flags(&self, req: &RequestDescription) -> Vec<EscalationFlag> {
        detect_escalation(req)
    }
}
