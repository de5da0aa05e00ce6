//! Runtime configuration, layered CLI/env/dotfile per [`ortho_config::OrthoConfig`]
//! (§10.3). Kept separate from [`crate::opcode`]'s compile-time protocol
//! constants: this module only holds values an operator may reasonably want
//! to tune per deployment.

#![expect(
    non_snake_case,
    reason = "Clap/OrthoConfig derive macros generate helper modules with uppercase names"
)]
#![allow(missing_docs, reason = "OrthoConfig and Clap derive macros generate items that cannot be documented")]
#![allow(unfulfilled_lint_expectations, reason = "derive macros conditionally generate items")]

use clap::Parser;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

use crate::opcode::JOB_COUNT_PER_GROUP_MAX;

/// Default `recv` timeout, in milliseconds, before a connection is judged
/// dead and torn down (§7, tier 3: `CtcpError::Timeout`).
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 30_000;

/// Default bound on a single `CAPTURED_DATA_RESULT` payload
/// (`PACKET_DATA_MAX_LEN`, §3).
pub const DEFAULT_PACKET_DATA_MAX_LEN: u32 = 64 * 1024;

/// Runtime configuration for the `ctcpd` server binary.
#[expect(missing_docs, reason = "OrthoConfig derive macro generates items that cannot be documented")]
#[derive(Parser, OrthoConfig, Serialize, Deserialize, Debug, Clone)]
#[ortho_config(prefix = "CTCP_")]
pub struct AppConfig {
    /// Address to bind the TCP listener to.
    #[ortho_config(default = "0.0.0.0:6400".to_owned())]
    #[arg(long, default_value_t = String::from("0.0.0.0:6400"))]
    pub bind: String,

    /// Maximum idle time, in milliseconds, `recv` will wait for a frame
    /// before the connection is treated as dead.
    #[ortho_config(default = DEFAULT_RECV_TIMEOUT_MS)]
    #[arg(long, default_value_t = DEFAULT_RECV_TIMEOUT_MS)]
    pub recv_timeout_ms: u64,

    /// Upper bound on a single capture-data frame's payload
    /// (`PACKET_DATA_MAX_LEN`).
    #[ortho_config(default = DEFAULT_PACKET_DATA_MAX_LEN)]
    #[arg(long, default_value_t = DEFAULT_PACKET_DATA_MAX_LEN)]
    pub packet_data_max_len: u32,

    /// Maximum jobs permitted per session group.
    #[ortho_config(default = JOB_COUNT_PER_GROUP_MAX)]
    #[arg(long, default_value_t = JOB_COUNT_PER_GROUP_MAX)]
    pub job_max_per_group: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:6400".to_owned(),
            recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS,
            packet_data_max_len: DEFAULT_PACKET_DATA_MAX_LEN,
            job_max_per_group: JOB_COUNT_PER_GROUP_MAX,
        }
    }
}

/// Top-level CLI entry point for the `ctcpd` binary.
#[derive(Parser, Deserialize, Serialize, Debug, Clone)]
pub struct Cli {
    /// Server configuration.
    #[command(flatten)]
    pub config: AppConfig,
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn env_config_loading() {
        Jail::expect_with(|j| {
            j.set_env("CTCP_BIND", "127.0.0.1:7000");
            j.set_env("CTCP_PACKET_DATA_MAX_LEN", "2048");
            let cfg = AppConfig::load_from_iter(["ctcpd"]).expect("load");
            assert_eq!(cfg.bind, "127.0.0.1:7000");
            assert_eq!(cfg.packet_data_max_len, 2048);
            Ok(())
        });
    }

    #[rstest]
    fn cli_overrides_env() {
        Jail::expect_with(|j| {
            j.set_env("CTCP_BIND", "127.0.0.1:7000");
            let cfg = AppConfig::load_from_iter(["ctcpd", "--bind", "0.0.0.0:9000"]).expect("load");
            assert_eq!(cfg.bind, "0.0.0.0:9000");
            Ok(())
        });
    }

    #[rstest]
    fn loads_from_dotfile() {
        Jail::expect_with(|j| {
            j.create_file(".ctcpd.toml", "bind = \"1.2.3.4:1111\"")?;
            let cfg = AppConfig::load_from_iter(["ctcpd"]).expect("load");
            assert_eq!(cfg.bind, "1.2.3.4:1111".to_string());
            Ok(())
        });
    }

    #[rstest]
    fn job_max_per_group_cli_override() {
        Jail::expect_with(|_j| {
            let cfg = AppConfig::load_from_iter(["ctcpd", "--job-max-per-group", "4"]).expect("load");
            assert_eq!(cfg.job_max_per_group, 4);
            Ok(())
        });
    }
}
