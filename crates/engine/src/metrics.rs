//! Metric names and recording helpers.
//!
//! Recorded through the `metrics` facade; no exporter is installed here, so
//! the calls are no-ops unless the embedding binary installs a recorder.

use ::metrics::{counter, gauge};

pub const DATAGRAMS_RECEIVED: &str = "udp2p_datagrams_received_total";
pub const DATAGRAMS_DROPPED: &str = "udp2p_datagrams_dropped_total";
pub const PACKETS_SENT: &str = "udp2p_packets_sent_total";
pub const RETRANSMISSIONS: &str = "udp2p_retransmissions_total";
pub const DELIVERY_FAILURES: &str = "udp2p_delivery_failures_total";
pub const ROUTING_TABLE_PEERS: &str = "udp2p_routing_table_peers";

pub(crate) fn datagram_received() {
    counter!(DATAGRAMS_RECEIVED).increment(1);
}

/// `kind` is an [`Error::kind`](crate::Error::kind) label.
pub(crate) fn datagram_dropped(kind: &'static str) {
    counter!(DATAGRAMS_DROPPED, "kind" => kind).increment(1);
}

pub(crate) fn packet_sent() {
    counter!(PACKETS_SENT).increment(1);
}

pub(crate) fn retransmission() {
    counter!(RETRANSMISSIONS).increment(1);
}

pub(crate) fn delivery_failure() {
    counter!(DELIVERY_FAILURES).increment(1);
}

pub(crate) fn table_size(peers: usize) {
    gauge!(ROUTING_TABLE_PEERS).set(peers as f64);
}
