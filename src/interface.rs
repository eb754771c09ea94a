//! Communication interfaces: which local indices flow to and from each peer.
//!
//! An [`Interface`] is the precomputed per-peer pair of ordered index lists
//! that drives a transfer. Building one from an index set is a concern of
//! the decomposition layer; engines only consume it and hold a non-owning
//! reference for as long as they are built.

use std::collections::BTreeMap;
use std::ops::Index;

use crate::attribute::Attribute;
use crate::transport::Rank;

/// Ordered sequence of local indices on one side of a peer exchange.
///
/// Indices may repeat, and order is significant: the k-th value sent from
/// this list lands at the k-th slot of the peer's matching list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceInfo {
    indices: Vec<usize>,
}

impl InterfaceInfo {
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }
}

impl Index<usize> for InterfaceInfo {
    type Output = usize;

    fn index(&self, i: usize) -> &usize {
        &self.indices[i]
    }
}

impl From<Vec<usize>> for InterfaceInfo {
    fn from(indices: Vec<usize>) -> Self {
        Self::new(indices)
    }
}

/// Per-peer pair of index lists: values gathered from `outgoing` flow to the
/// peer, values arriving from the peer scatter into `incoming`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfacePair {
    pub outgoing: InterfaceInfo,
    pub incoming: InterfaceInfo,
}

/// Map from peer rank to the index lists exchanged with that peer.
///
/// Peers iterate in ascending rank order; both ends of a peer pair must
/// build their interfaces over the same peer set so that message slices
/// line up.
#[derive(Debug, Clone, Default)]
pub struct Interface {
    peers: BTreeMap<Rank, InterfacePair>,
}

impl Interface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the index lists exchanged with `peer`, replacing any
    /// previous registration.
    pub fn insert(
        &mut self,
        peer: Rank,
        outgoing: impl Into<InterfaceInfo>,
        incoming: impl Into<InterfaceInfo>,
    ) {
        self.peers.insert(
            peer,
            InterfacePair {
                outgoing: outgoing.into(),
                incoming: incoming.into(),
            },
        );
    }

    pub fn get(&self, peer: Rank) -> Option<&InterfacePair> {
        self.peers.get(&peer)
    }

    /// Peers in ascending rank order.
    pub fn iter(&self) -> impl Iterator<Item = (Rank, &InterfacePair)> {
        self.peers.iter().map(|(rank, pair)| (*rank, pair))
    }

    pub fn num_peers(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// One local index known to a remote process, with its attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteIndex {
    pub local: usize,
    pub attribute: Attribute,
}

impl RemoteIndex {
    pub fn new(local: usize, attribute: Attribute) -> Self {
        Self { local, attribute }
    }
}

/// Map from peer rank to the shared indices known on both sides, in the
/// order agreed with that peer.
///
/// This is the input contract of the datatype engine: each engine direction
/// filters the per-peer list by an attribute predicate.
#[derive(Debug, Clone, Default)]
pub struct RemoteIndexMap {
    peers: BTreeMap<Rank, Vec<RemoteIndex>>,
}

impl RemoteIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, peer: Rank, indices: Vec<RemoteIndex>) {
        self.peers.insert(peer, indices);
    }

    pub fn get(&self, peer: Rank) -> Option<&[RemoteIndex]> {
        self.peers.get(&peer).map(Vec::as_slice)
    }

    /// Peers in ascending rank order.
    pub fn iter(&self) -> impl Iterator<Item = (Rank, &[RemoteIndex])> {
        self.peers.iter().map(|(rank, list)| (*rank, list.as_slice()))
    }

    pub fn num_peers(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_iterates_peers_in_rank_order() {
        let mut interface = Interface::new();
        interface.insert(3, vec![0], vec![1]);
        interface.insert(1, vec![2], vec![3]);
        interface.insert(2, vec![4], vec![5]);

        let ranks: Vec<Rank> = interface.iter().map(|(rank, _)| rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn interface_info_preserves_order_and_repeats() {
        let info = InterfaceInfo::new(vec![2, 0, 0, 1]);
        assert_eq!(info.len(), 4);
        assert_eq!(info[1], 0);
        assert_eq!(info.iter().collect::<Vec<_>>(), vec![2, 0, 0, 1]);
    }

    #[test]
    fn insert_replaces_previous_lists() {
        let mut interface = Interface::new();
        interface.insert(1, vec![0, 1], vec![]);
        interface.insert(1, vec![2], vec![3]);

        let pair = interface.get(1).unwrap();
        assert_eq!(pair.outgoing, InterfaceInfo::new(vec![2]));
        assert_eq!(pair.incoming, InterfaceInfo::new(vec![3]));
        assert_eq!(interface.num_peers(), 1);
    }
}
