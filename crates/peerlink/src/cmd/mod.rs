use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Mutex;

use bytes::Bytes;
use clap::{Args, Subcommand};
use peerlink_peer::LinkDelegate;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept one peer link and print received frames.
    Listen(ListenArgs),
    /// Keep dialing the loopback port and print received frames.
    Watch(WatchArgs),
    /// Send a single frame over a fresh loopback connection.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format),
        Command::Watch(args) => watch::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Port to listen on.
    #[arg(long, short = 'p', default_value = "2345")]
    pub port: u16,
    /// Filter to specific frame types (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub types: Option<Vec<u32>>,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Port to dial.
    #[arg(long, short = 'p', default_value = "2345")]
    pub port: u16,
    /// Filter to specific frame types (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub types: Option<Vec<u32>>,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Port to dial.
    #[arg(long, short = 'p', default_value = "2345")]
    pub port: u16,
    /// Frame type to send.
    #[arg(long, short = 't', default_value = "100")]
    pub frame_type: u32,
    /// Integer payload (sent as a number frame).
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub number: Option<i64>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["number", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["number", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for one response frame and print it.
    #[arg(long)]
    pub wait: bool,
    /// Connect and response timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// What a watching command reacts to.
#[derive(Debug)]
pub enum LinkEvent {
    Connection(bool),
    Frame(u32, Bytes),
}

/// Forwards delegate callbacks into a channel the command loop drains.
pub struct ChannelDelegate {
    tx: Mutex<Sender<LinkEvent>>,
    types: Option<Vec<u32>>,
}

impl ChannelDelegate {
    pub fn new(types: Option<Vec<u32>>) -> (std::sync::Arc<Self>, Receiver<LinkEvent>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (
            std::sync::Arc::new(Self {
                tx: Mutex::new(tx),
                types,
            }),
            rx,
        )
    }

    fn post(&self, event: LinkEvent) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(event);
        }
    }
}

impl LinkDelegate for ChannelDelegate {
    fn should_accept_frame(&self, frame_type: u32) -> bool {
        match &self.types {
            Some(types) => types.contains(&frame_type),
            None => true,
        }
    }

    fn did_receive_frame(&self, frame_type: u32, payload: Bytes) {
        self.post(LinkEvent::Frame(frame_type, payload));
    }

    fn did_change_connection(&self, connected: bool) {
        self.post(LinkEvent::Connection(connected));
    }
}
