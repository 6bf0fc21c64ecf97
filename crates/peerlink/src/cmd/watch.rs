use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use peerlink_peer::{LinkConfig, LinkManager};
use tracing::info;

use crate::cmd::listen::{install_ctrlc_handler, print_loop};
use crate::cmd::{ChannelDelegate, WatchArgs};
use crate::exit::CliResult;
use crate::output::OutputFormat;

pub fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let (delegate, events) = ChannelDelegate::new(args.types.clone());
    let manager = LinkManager::loopback(
        LinkConfig {
            port: args.port,
            ..LinkConfig::default()
        },
        delegate,
    );
    manager.start();
    info!(port = args.port, "watching");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let code = print_loop(&events, format, args.count, &running, "loopback");
    manager.stop();
    code
}
