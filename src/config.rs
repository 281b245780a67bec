//! Audit subsystem configuration, assembled once by the binary entrypoint
//! and threaded explicitly into the audit loop and write-back loop.
//!
//! Flags are declared on an explicit struct rather than registered as
//! package-level side effects at module init, so values are threaded as
//! data rather than read back out of globals.

use std::time::Duration;

use clap::Args;

/// `--audit-interval`, `--constraint-violations-limit`, etc.
#[derive(Debug, Clone, Args)]
pub struct AuditConfig {
    /// Period between audit ticks, in seconds. 0 disables auditing.
    #[arg(long, default_value_t = 60)]
    pub audit_interval: u64,

    /// Per-constraint cap on stored violation records.
    #[arg(long, default_value_t = 20)]
    pub constraint_violations_limit: u32,

    /// List page size in discovery mode. 0 means no chunking.
    #[arg(long, default_value_t = 0)]
    pub audit_chunk_size: u64,

    /// Select cache-based (true) vs discovery-based (false) violation
    /// sourcing.
    #[arg(long, default_value_t = false)]
    pub audit_from_cache: bool,

    /// Narrow discovery to kinds named in installed constraints.
    #[arg(long, default_value_t = false)]
    pub audit_match_kind_only: bool,

    /// Publish one Warning event per violation found in discovery mode.
    #[arg(long, default_value_t = false)]
    pub emit_audit_events: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            audit_interval: 60,
            constraint_violations_limit: 20,
            audit_chunk_size: 0,
            audit_from_cache: false,
            audit_match_kind_only: false,
            emit_audit_events: false,
        }
    }
}

impl AuditConfig {
    /// `None` when auditing is disabled (`audit-interval == 0`); the
    /// component is then not started at all.
    pub fn interval(&self) -> Option<Duration> {
        if self.audit_interval == 0 {
            None
        } else {
            Some(Duration::from_secs(self.audit_interval))
        }
    }
}

/// `POD_NAMESPACE` default when unset.
pub const DEFAULT_EVENT_NAMESPACE: &str = "policy-system";

/// Read `POD_NAMESPACE` from the environment, falling back to the default above.
pub fn event_namespace() -> String {
    std::env::var("POD_NAMESPACE").unwrap_or_else(|_| DEFAULT_EVENT_NAMESPACE.to_string())
}
