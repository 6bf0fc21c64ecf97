use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use peerlink_frame::Frame;
use peerlink_peer::{LinkConfig, LinkManager};
use tracing::info;

use crate::cmd::{ChannelDelegate, LinkEvent, ListenArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let (delegate, events) = ChannelDelegate::new(args.types.clone());
    let manager = LinkManager::listener(
        LinkConfig {
            port: args.port,
            ..LinkConfig::default()
        },
        delegate,
    );
    manager.start();
    info!(port = args.port, "listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let code = print_loop(&events, format, args.count, &running, "inbound");
    manager.stop();
    code
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Drain link events until interrupted or `count` frames have printed.
pub(crate) fn print_loop(
    events: &Receiver<LinkEvent>,
    format: OutputFormat,
    count: Option<usize>,
    running: &AtomicBool,
    peer_label: &str,
) -> CliResult<i32> {
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(LinkEvent::Connection(true)) => info!("link up"),
            Ok(LinkEvent::Connection(false)) => info!("link down"),
            Ok(LinkEvent::Frame(frame_type, payload)) => {
                print_frame(&Frame::new(frame_type, payload), peer_label, format);
                printed = printed.saturating_add(1);
                if let Some(count) = count {
                    if printed >= count {
                        return Ok(SUCCESS);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(SUCCESS)
}
