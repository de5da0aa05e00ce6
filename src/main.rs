//! Binary entry point for the `ctcpd` server.
//!
//! Parses configuration, installs the tracing subscriber, wires up the
//! reference [`ctcp::session::SessionManager`]/[`ctcp::logcapture::LogCaptor`]
//! implementations, and delegates the accept loop to [`ctcp::server::run`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use ctcp::config::Cli;
use ctcp::logcapture::ChannelLogCaptor;
use ctcp::logging;
use ctcp::server;
use ctcp::session::InMemorySessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init()?;

    let bind = cli.config.bind.parse().context("invalid bind address")?;
    let recv_timeout = Duration::from_millis(cli.config.recv_timeout_ms);
    let packet_data_max_len = usize::try_from(cli.config.packet_data_max_len)
        .context("packet_data_max_len does not fit in a usize on this platform")?;

    let session = Arc::new(InMemorySessionManager::new(cli.config.job_max_per_group));
    let captor = Arc::new(ChannelLogCaptor::new());

    server::run(bind, recv_timeout, packet_data_max_len, session, captor)
        .await
        .context("server loop failed")
}
