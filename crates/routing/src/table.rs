//! Kademlia-style routing table.
//!
//! The table owns one bucket per address bit. A peer lives in the bucket
//! given by the number of leading zero bits of `local XOR peer`, so bucket 0
//! holds the half of the address space furthest from us and bucket 159 the
//! single closest neighbour range. Each bucket holds at most `k` peers.
//!
//! # Capacity
//!
//! A full bucket rejects new peers outright. There is no replacement cache
//! and no ping-the-oldest policy; room is only made when dead peers are
//! evicted by periodic maintenance.

use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;
use udp2p_core::address::ADDRESS_BITS;
use udp2p_core::{compression, Address};

use crate::error::{Result, RoutingError};
use crate::peer::{encode_peers, Peer};

/// Idle time after which a peer is pinged.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5);

/// Idle time after which a peer is evicted.
pub const DEFAULT_DEAD_AFTER: Duration = Duration::from_secs(15);

/// Result of offering a peer to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    /// The address was already present; the table is unchanged.
    AlreadyPresent,
    /// The peer's bucket already holds `k` peers.
    BucketFull,
    /// The peer has the local address.
    SelfAddress,
}

#[derive(Debug, Clone, Default)]
struct Bucket {
    peers: Vec<Peer>,
}

impl Bucket {
    fn position(&self, address: &Address) -> Option<usize> {
        self.peers.iter().position(|p| p.address() == address)
    }
}

/// Bucketed store of known peers.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    local: Address,
    k: usize,
    buckets: Vec<Bucket>,
    len: usize,
    stale_after: Duration,
    dead_after: Duration,
}

impl RoutingTable {
    /// Create an empty table for `local` with bucket capacity `k`.
    pub fn new(local: Address, k: usize) -> Self {
        Self::with_liveness(local, k, DEFAULT_STALE_AFTER, DEFAULT_DEAD_AFTER)
    }

    /// Create an empty table with custom liveness thresholds.
    pub fn with_liveness(local: Address, k: usize, stale_after: Duration, dead_after: Duration) -> Self {
        Self {
            local,
            k,
            buckets: vec![Bucket::default(); ADDRESS_BITS],
            len: 0,
            stale_after,
            dead_after,
        }
    }

    pub fn local_address(&self) -> &Address {
        &self.local
    }

    /// Bucket capacity.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of peers in the table.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bucket of `address`, or `None` for the local address.
    pub fn bucket_index(&self, address: &Address) -> Option<usize> {
        self.local.bucket_index(address)
    }

    /// Number of peers in bucket `index`.
    pub fn bucket_len(&self, index: usize) -> usize {
        self.buckets.get(index).map_or(0, |b| b.peers.len())
    }

    /// Whether the bucket `address` maps to has a free slot. Always false for
    /// the local address.
    pub fn has_space(&self, address: &Address) -> bool {
        self.bucket_index(address)
            .is_some_and(|i| self.buckets[i].peers.len() < self.k)
    }

    /// Offer a peer to the table.
    pub fn add(&mut self, peer: Peer) -> AddOutcome {
        let Some(index) = self.bucket_index(peer.address()) else {
            return AddOutcome::SelfAddress;
        };
        let bucket = &mut self.buckets[index];
        if bucket.position(peer.address()).is_some() {
            return AddOutcome::AlreadyPresent;
        }
        if bucket.peers.len() >= self.k {
            debug!(peer = %peer, bucket = index, "bucket full, peer rejected");
            return AddOutcome::BucketFull;
        }

        debug!(peer = %peer, bucket = index, "peer added");
        bucket.peers.push(peer);
        self.len += 1;
        AddOutcome::Inserted
    }

    /// Remove a peer, returning it if it was present.
    pub fn remove(&mut self, address: &Address) -> Option<Peer> {
        let index = self.bucket_index(address)?;
        let bucket = &mut self.buckets[index];
        let pos = bucket.position(address)?;
        self.len -= 1;
        Some(bucket.peers.remove(pos))
    }

    pub fn get(&self, address: &Address) -> Option<&Peer> {
        let bucket = &self.buckets[self.bucket_index(address)?];
        bucket.position(address).map(|pos| &bucket.peers[pos])
    }

    pub fn get_mut(&mut self, address: &Address) -> Option<&mut Peer> {
        let index = self.bucket_index(address)?;
        let bucket = &mut self.buckets[index];
        let pos = bucket.position(address)?;
        Some(&mut bucket.peers[pos])
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.get(address).is_some()
    }

    /// Record that `address` was heard from at `now`.
    pub fn witness(&mut self, address: &Address, now: Instant) -> Result<()> {
        if *address == self.local {
            return Err(RoutingError::SelfAddress);
        }
        let peer = self
            .get_mut(address)
            .ok_or(RoutingError::PeerNotFound(*address))?;
        peer.witness_at(now);
        Ok(())
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.buckets.iter().flat_map(|b| b.peers.iter())
    }

    /// Snapshot of every peer in the table.
    pub fn all_peers(&self) -> Vec<Peer> {
        self.peers().cloned().collect()
    }

    /// Peers idle for longer than the stale threshold; dead peers included.
    pub fn stale_peers(&self, now: Instant) -> Vec<Peer> {
        self.peers()
            .filter(|p| p.is_stale(now, self.stale_after))
            .cloned()
            .collect()
    }

    /// Peers idle for longer than the dead threshold.
    pub fn dead_peers(&self, now: Instant) -> Vec<Peer> {
        self.peers()
            .filter(|p| p.is_dead(now, self.dead_after))
            .cloned()
            .collect()
    }

    /// Remove and return every dead peer.
    pub fn evict_dead(&mut self, now: Instant) -> Vec<Peer> {
        let dead_after = self.dead_after;
        let mut evicted = Vec::new();
        for (index, bucket) in self.buckets.iter_mut().enumerate() {
            let (dead, alive): (Vec<Peer>, Vec<Peer>) = bucket
                .peers
                .drain(..)
                .partition(|p| p.is_dead(now, dead_after));
            bucket.peers = alive;
            for peer in &dead {
                debug!(peer = %peer, bucket = index, "evicting dead peer");
            }
            evicted.extend(dead);
        }
        self.len -= evicted.len();
        evicted
    }

    /// Up to `n` distinct peers, each drawn by picking a random non-empty
    /// bucket and then a random peer in it. Fewer are returned when draws
    /// repeat or the table is small.
    pub fn random_sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Peer> {
        let occupied: Vec<&Bucket> = self.buckets.iter().filter(|b| !b.peers.is_empty()).collect();
        let mut sample: Vec<Peer> = Vec::with_capacity(n.min(self.len));
        if occupied.is_empty() {
            return sample;
        }

        for _ in 0..n {
            let Some(peer) = occupied.choose(rng).and_then(|b| b.peers.choose(rng)) else {
                continue;
            };
            if !sample.iter().any(|p| p.address() == peer.address()) {
                sample.push(peer.clone());
            }
        }
        sample
    }

    /// Encode every peer as a list of peer records.
    pub fn encode_all(&self) -> Result<Vec<u8>> {
        Ok(encode_peers(self.peers())?)
    }

    /// Encode a random sample of up to `n` peers.
    pub fn encode_subset<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Vec<u8>> {
        Ok(encode_peers(&self.random_sample(n, rng))?)
    }

    /// Compressed encoding of a random sample of up to `n` peers, dropping
    /// peers from the sample until the result is at most `limit` bytes.
    pub fn encode_subset_within<R: Rng + ?Sized>(
        &self,
        n: usize,
        limit: usize,
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        let mut sample = self.random_sample(n, rng);
        loop {
            let packed = compression::compress(&encode_peers(&sample)?)?;
            if packed.len() <= limit || sample.pop().is_none() {
                return Ok(packed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn local() -> Address {
        Address([0u8; 20])
    }

    /// Address whose only set bit is `bit` (0 = most significant).
    fn with_bit(bit: usize) -> Address {
        let mut bytes = [0u8; 20];
        bytes[bit / 8] = 0x80 >> (bit % 8);
        Address(bytes)
    }

    fn peer(address: Address) -> Peer {
        Peer::new(address, "127.0.0.1".parse().unwrap())
    }

    #[test]
    fn test_add_and_get() {
        let mut table = RoutingTable::new(local(), 4);
        let p = peer(with_bit(10));
        assert_eq!(table.add(p.clone()), AddOutcome::Inserted);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&with_bit(10)), Some(&p));
        assert_eq!(table.bucket_len(10), 1);
        assert!(table.contains(&with_bit(10)));
    }

    #[test]
    fn test_add_twice_is_noop() {
        let mut table = RoutingTable::new(local(), 4);
        table.add(peer(with_bit(3)));
        assert_eq!(table.add(peer(with_bit(3))), AddOutcome::AlreadyPresent);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_self_is_never_added() {
        let mut table = RoutingTable::new(local(), 4);
        assert!(!table.has_space(&local()));
        assert_eq!(table.add(peer(local())), AddOutcome::SelfAddress);
        assert!(table.is_empty());
        assert_eq!(table.witness(&local(), Instant::now()), Err(RoutingError::SelfAddress));
    }

    #[test]
    fn test_remove() {
        let mut table = RoutingTable::new(local(), 4);
        table.add(peer(with_bit(7)));
        assert!(table.remove(&with_bit(7)).is_some());
        assert!(table.remove(&with_bit(7)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_witness_unknown_peer() {
        let mut table = RoutingTable::new(local(), 4);
        assert_eq!(
            table.witness(&with_bit(1), Instant::now()),
            Err(RoutingError::PeerNotFound(with_bit(1)))
        );
    }

    #[test]
    fn test_stale_and_dead_thresholds() {
        let now = Instant::now();
        let mut table = RoutingTable::new(local(), 4);
        table.add(Peer::seen_at(with_bit(1), "10.0.0.1".parse().unwrap(), now));
        table.add(Peer::seen_at(with_bit(2), "10.0.0.2".parse().unwrap(), now + Duration::from_secs(8)));

        let later = now + Duration::from_secs(16);
        assert_eq!(table.stale_peers(later).len(), 2);
        assert_eq!(table.dead_peers(later).len(), 1);

        let evicted = table.evict_dead(later);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].address(), &with_bit(1));
        assert_eq!(table.len(), 1);
        assert!(table.dead_peers(later).is_empty());
    }

    #[test]
    fn test_random_sample_empty_table() {
        let table = RoutingTable::new(local(), 4);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(table.random_sample(31, &mut rng).is_empty());
    }

    #[test]
    fn test_random_sample_is_distinct_and_bounded() {
        let mut table = RoutingTable::new(local(), 4);
        for bit in 0..40 {
            table.add(peer(with_bit(bit)));
        }
        let mut rng = StdRng::seed_from_u64(7);
        let sample = table.random_sample(31, &mut rng);
        assert!(!sample.is_empty());
        assert!(sample.len() <= 31);
        for (i, p) in sample.iter().enumerate() {
            assert!(table.contains(p.address()));
            assert!(sample[i + 1..].iter().all(|q| q.address() != p.address()));
        }
    }

    #[test]
    fn test_encode_subset_within_limit() {
        let mut table = RoutingTable::new(local(), 20);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..160 {
            let bytes: [u8; 20] = rng.gen();
            table.add(Peer::new(Address(bytes), "fe80::1234".parse().unwrap()));
        }
        assert!(table.len() > 31);

        let packed = table.encode_subset_within(31, 200, &mut rng).unwrap();
        assert!(packed.len() <= 200);
        let decoded = crate::peer::decode_peers(
            &compression::decompress(&packed).unwrap(),
            31,
            Instant::now(),
        )
        .unwrap();
        assert!(!decoded.is_empty());
        assert!(decoded.iter().all(|p| table.contains(p.address())));
    }
}
