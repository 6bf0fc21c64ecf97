use std::fs;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use peerlink_frame::types::encode_number;
use peerlink_frame::Frame;
use peerlink_peer::{LinkConfig, LinkManager};

use crate::cmd::{ChannelDelegate, LinkEvent, SendArgs};
use crate::exit::{link_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;

    let (delegate, events) = ChannelDelegate::new(None);
    let manager = LinkManager::loopback(
        LinkConfig {
            port: args.port,
            ..LinkConfig::default()
        },
        delegate,
    );
    manager.start();

    wait_for_connection(&events, timeout)?;

    manager
        .send(args.frame_type, payload)
        .wait_timeout(timeout)
        .map_err(|err| link_error("send failed", err))?;

    if args.wait {
        let frame = wait_for_frame(&events, timeout)?;
        print_frame(&frame, "loopback", format);
    }

    manager.stop();
    Ok(SUCCESS)
}

fn wait_for_connection(events: &Receiver<LinkEvent>, timeout: Duration) -> CliResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CliError::new(TIMEOUT, "connect timed out"));
        }
        match events.recv_timeout(remaining) {
            Ok(LinkEvent::Connection(true)) => return Ok(()),
            Ok(_) => continue,
            Err(_) => return Err(CliError::new(TIMEOUT, "connect timed out")),
        }
    }
}

fn wait_for_frame(events: &Receiver<LinkEvent>, timeout: Duration) -> CliResult<Frame> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CliError::new(TIMEOUT, "no response before timeout"));
        }
        match events.recv_timeout(remaining) {
            Ok(LinkEvent::Frame(frame_type, payload)) => {
                return Ok(Frame::new(frame_type, payload));
            }
            Ok(LinkEvent::Connection(false)) => {
                return Err(CliError::new(
                    crate::exit::FAILURE,
                    "link closed before a response arrived",
                ));
            }
            Ok(_) => continue,
            Err(_) => return Err(CliError::new(TIMEOUT, "no response before timeout")),
        }
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(number) = args.number {
        return Ok(encode_number(number).to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
