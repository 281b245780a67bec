//! Binary-level configuration: top-level flags plus the flattened audit
//! subsystem configuration, a plain `clap::Parser` CLI for this
//! controller's single run mode.

use clap::Parser;

use constraint_audit::config::AuditConfig;

#[derive(Parser, Debug)]
#[command(name = "audit-controller")]
#[command(about = "Periodic constraint audit and status write-back controller")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(flatten)]
    pub audit: AuditConfig,

    /// API group that serves one kind per installed constraint.
    #[arg(long, default_value = "constraints.policy.example.io")]
    pub constraint_api_group: String,

    /// Address the metrics/health HTTP server listens on.
    #[arg(long, default_value = "0.0.0.0:9090")]
    pub metrics_addr: String,
}
