//! CLI commands and their results.

use std::fmt;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, ensure, Context};
use clap::{Args, Subcommand};
use crossbeam::channel::RecvTimeoutError;
use rand::RngCore;
use tracing::{info, warn};
use udp2p_core::address::ADDRESS_LEN;
use udp2p_core::crypto::{self, TAG_LEN};
use udp2p_core::{Address, Header, Keypair, Packet, PacketSet, PacketType, MAX_DATAGRAM, MAX_PAYLOAD};
use udp2p_engine::{EngineConfig, NodeHandle, P2PSocket};

/// How often the run loop checks for shutdown, failures and peers.
const POLL: Duration = Duration::from_millis(200);

/// Payload length used by the self-test; one byte over a single packet.
const SELFTEST_PAYLOAD: usize = MAX_PAYLOAD + 1;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a node and log inbound application messages.
    Run(RunArgs),

    /// Generate a node key and write it as hex.
    Keygen {
        /// Where to write the secret key.
        #[arg(long)]
        out: PathBuf,

        /// Replace an existing key file.
        #[arg(long)]
        force: bool,
    },

    /// Check packet encoding, signing and fragmentation locally.
    Selftest,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// JSON engine configuration; flags below take precedence.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// UDP bind address.
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    #[arg(long)]
    pub network_id: Option<u32>,

    /// Bucket capacity.
    #[arg(short)]
    pub k: Option<usize>,

    /// Hex secret key from `udp2p keygen`. A fresh key is used if omitted.
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// IP of a node to bootstrap from. Repeatable.
    #[arg(long)]
    pub bootstrap: Vec<IpAddr>,

    /// Broadcast this text once the first peer is known.
    #[arg(long)]
    pub announce: Option<String>,

    /// Application packet type used for the announcement.
    #[arg(long, default_value_t = 11)]
    pub app_type: u32,
}

impl RunArgs {
    /// Engine configuration from the JSON file, if any, with flags applied.
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind = bind;
            config.overlay_port = bind.port();
        }
        if let Some(network_id) = self.network_id {
            config.network_id = network_id;
        }
        if let Some(k) = self.k {
            config.k = k;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelftestReport {
    pub max_packet_len: usize,
    pub payload_len: usize,
    pub fragments: usize,
    pub fingerprint: String,
}

#[derive(Debug)]
pub enum CommandResult {
    Stopped { address: Address },
    KeyWritten { path: PathBuf, address: Address },
    Selftest(SelftestReport),
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Stopped { address } => write!(f, "node {} stopped", address),
            CommandResult::KeyWritten { path, address } => {
                write!(f, "wrote key for {} to {}", address, path.display())
            }
            CommandResult::Selftest(report) => write!(
                f,
                "selftest ok: max packet {} of {} bytes, {} byte payload in {} fragments, fingerprint {}",
                report.max_packet_len,
                MAX_DATAGRAM,
                report.payload_len,
                report.fragments,
                report.fingerprint
            ),
        }
    }
}

impl Command {
    pub fn execute(self) -> anyhow::Result<CommandResult> {
        match self {
            Command::Run(args) => run(args),
            Command::Keygen { out, force } => keygen(&out, force),
            Command::Selftest => selftest().map(CommandResult::Selftest),
        }
    }
}

/// Read a hex secret key written by `keygen`.
pub fn load_keypair(path: &Path) -> anyhow::Result<Keypair> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let secret = hex::decode(text.trim()).context("key file is not hex")?;
    Ok(Keypair::from_secret_bytes(&secret)?)
}

pub fn keygen(out: &Path, force: bool) -> anyhow::Result<CommandResult> {
    if out.exists() && !force {
        bail!("{} exists; pass --force to replace it", out.display());
    }
    let keypair = Keypair::generate();
    fs::write(out, format!("{}\n", hex::encode(keypair.secret_bytes())))
        .with_context(|| format!("writing {}", out.display()))?;
    Ok(CommandResult::KeyWritten {
        path: out.to_path_buf(),
        address: keypair.address(),
    })
}

fn run(args: RunArgs) -> anyhow::Result<CommandResult> {
    let config = args.engine_config()?;
    let keypair = match &args.key_file {
        Some(path) => load_keypair(path)?,
        None => Keypair::generate(),
    };
    let announce_type = PacketType::application(args.app_type)
        .with_context(|| format!("packet type {} is reserved", args.app_type))?;

    let interrupted = interrupt_flag()?;
    let node = P2PSocket::bind(config, keypair)?;
    for ip in &args.bootstrap {
        node.connect(*ip)?;
    }
    serve(node, announce_type, args.announce, &interrupted)
}

/// Set once Ctrl-C is received.
fn interrupt_flag() -> anyhow::Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting signal listener")?;
    let set = Arc::clone(&flag);
    thread::Builder::new()
        .name("udp2p-signal".into())
        .spawn(move || match runtime.block_on(tokio::signal::ctrl_c()) {
            Ok(()) => set.store(true, Ordering::Release),
            Err(err) => warn!(error = %err, "cannot listen for Ctrl-C"),
        })?;
    Ok(flag)
}

/// Log inbound messages and failures until the node stops or `stop` is set,
/// then shut the node down and wait for its worker.
pub fn serve(
    node: NodeHandle,
    announce_type: PacketType,
    mut announce: Option<String>,
    stop: &AtomicBool,
) -> anyhow::Result<CommandResult> {
    let address = *node.address();
    while node.is_running() {
        if stop.load(Ordering::Acquire) {
            info!("interrupted, shutting down");
            node.shutdown();
            break;
        }
        match node.inbox().recv_timeout(POLL) {
            Ok(message) => info!(
                from = %message.from,
                packet_type = %message.packet_type,
                len = message.payload.len(),
                text = %String::from_utf8_lossy(&message.payload),
                "message received"
            ),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        for failure in node.failures().try_iter() {
            warn!(
                peer = %failure.peer,
                packet_type = %failure.packet_type,
                ack_tag = %hex::encode(failure.ack_tag),
                "delivery failed"
            );
        }
        announce = try_announce(&node, announce_type, announce)?;
    }

    node.join()?;
    Ok(CommandResult::Stopped { address })
}

/// Broadcast the pending announcement once a peer is known. Returns what is
/// still pending.
fn try_announce(
    node: &NodeHandle,
    packet_type: PacketType,
    pending: Option<String>,
) -> anyhow::Result<Option<String>> {
    match pending {
        Some(text) if !node.peers().is_empty() => {
            node.broadcast(packet_type, text.into_bytes())?;
            info!("announcement sent");
            Ok(None)
        }
        pending => Ok(pending),
    }
}

pub fn selftest() -> anyhow::Result<SelftestReport> {
    let keypair = Keypair::generate();
    let mut rng = rand::thread_rng();

    let header = Header {
        set_index: u32::MAX,
        set_size: u32::MAX,
        magic: u8::MAX,
        target: Address([0xff; ADDRESS_LEN]),
        packet_type: PacketType::Application(u32::MAX),
        network_id: u32::MAX,
        message_hash: [0xff; TAG_LEN],
    };
    let largest = Packet::new(header, vec![0xff; MAX_PAYLOAD], &keypair)?;
    let max_packet_len = largest.encoded().len();
    ensure!(
        max_packet_len <= MAX_DATAGRAM,
        "largest packet is {} bytes, receive buffer is {}",
        max_packet_len,
        MAX_DATAGRAM
    );

    let mut payload = vec![0u8; SELFTEST_PAYLOAD];
    rng.fill_bytes(&mut payload);
    let sent = PacketSet::from_payload(
        PacketType::Application(11),
        Address::ZERO,
        &payload,
        0,
        &keypair,
    )?;

    let mut received: Option<PacketSet> = None;
    for packet in sent.packets() {
        let parsed = Packet::parse(packet.encoded())?;
        ensure!(parsed.verify(), "fragment {} failed verification", parsed.set_index());
        match received.as_mut() {
            Some(set) => {
                ensure!(set.accepts(&parsed), "fragment {} rejected", parsed.set_index());
                set.add(parsed);
            }
            None => received = Some(PacketSet::from_first_packet(parsed)?),
        }
    }
    let reassembled = received
        .and_then(|set| set.payload())
        .context("fragments did not complete the message")?;
    ensure!(reassembled == payload, "reassembled payload differs");

    let mut key = [0u8; 32];
    rng.fill_bytes(&mut key);
    let fingerprint = hex::encode(&crypto::keyed_digest(&key, &reassembled)[..8]);

    Ok(SelftestReport {
        max_packet_len,
        payload_len: payload.len(),
        fragments: sent.size(),
        fingerprint,
    })
}
