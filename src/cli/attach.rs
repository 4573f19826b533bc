use std::{
    io::{self, Write},
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::endpoint::{
    self, ElementIdentity, EndpointConfig, MemoryField, UnbindReason, DEFAULT_URL,
};

/// Act as the page: bind a field kept in this terminal to a running daemon.
///
/// Each line read from stdin replaces the field's whole value, as if typed.
/// Content synced from the file is printed to stdout.
#[derive(Debug, Parser)]
pub struct AttachCommand {
    /// The daemon to connect to.
    #[clap(long, default_value = DEFAULT_URL)]
    pub url: String,

    /// Seconds to wait between reconnect attempts.
    #[clap(long, default_value_t = 3)]
    pub reconnect_delay: u64,

    /// Value the field starts with. It is sent to the daemon as soon as the
    /// connection opens.
    #[clap(long, default_value = "")]
    pub initial: String,
}

impl AttachCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new().context("Could not start async runtime")?;
        runtime.block_on(self.run_async())
    }

    async fn run_async(self) -> anyhow::Result<()> {
        let field = MemoryField::new(
            ElementIdentity::textarea().with_id("terminal"),
            self.initial,
        );
        let mut rendered = field.subscribe();

        let (handle, task) = endpoint::spawn(EndpointConfig {
            url: self.url,
            reconnect_delay: Duration::from_secs(self.reconnect_delay),
        });

        let mut status = handle.status();
        status
            .wait_for(|status| status.connection == endpoint::ConnectionState::Connected)
            .await
            .context("Endpoint stopped before connecting")?;

        handle.bind(field.clone())?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line.context("Could not read stdin")? {
                    Some(line) => {
                        field.type_value(line.as_str());
                        handle.local_edit(line)?;
                    }
                    None => break,
                },

                changed = rendered.changed() => {
                    if changed.is_err() {
                        break;
                    }

                    let value = rendered.borrow_and_update().clone();
                    let mut stdout = io::stdout().lock();
                    writeln!(stdout, "{}", value)?;
                    stdout.flush()?;
                }

                _ = tokio::signal::ctrl_c() => break,
            }
        }

        handle.unbind(UnbindReason::Explicit)?;
        drop(handle);
        task.await.context("Endpoint task failed")?;

        Ok(())
    }
}
