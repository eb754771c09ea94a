//! In-process transport connecting ranks over channels.
//!
//! Every rank owns a single inbox; each peer holds a cloned sender into it.
//! Messages carry their origin rank and tag, and a small stash buffers
//! packets that arrive before the matching receive is posted, so sessions
//! with different tags can interleave freely.
//!
//! This is the transport used by the test suite: [`LocalTransport::connected`]
//! builds a fully wired peer group whose endpoints are moved onto one thread
//! per rank.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::error::{Result, SyncError};

use super::{
    DescribedRecv, DescribedSend, Rank, RecvPart, SendPart, Tag, Transport, TypeBlock, TypeHandle,
};

/// Reserved tag for the min-reduction; engine tags are non-negative.
const REDUCE_TAG: Tag = -1;

struct Packet {
    from: Rank,
    tag: Tag,
    bytes: Vec<u8>,
}

/// Channel-backed [`Transport`] endpoint for one rank.
pub struct LocalTransport {
    rank: Rank,
    size: usize,
    senders: BTreeMap<Rank, Sender<Packet>>,
    inbox: Receiver<Packet>,
    stash: VecDeque<Packet>,
    types: Vec<Option<Vec<TypeBlock>>>,
    fail_next_receive: bool,
}

impl LocalTransport {
    /// Build a fully connected peer group of `size` endpoints.
    pub fn connected(size: usize) -> Vec<LocalTransport> {
        let (senders, inboxes): (Vec<_>, Vec<_>) = (0..size).map(|_| channel()).unzip();
        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalTransport {
                rank: rank as Rank,
                size,
                senders: senders
                    .iter()
                    .enumerate()
                    .filter(|(peer, _)| *peer != rank)
                    .map(|(peer, sender)| (peer as Rank, sender.clone()))
                    .collect(),
                inbox,
                stash: VecDeque::new(),
                types: Vec::new(),
                fail_next_receive: false,
            })
            .collect()
    }

    /// Make the next completed receive report a transport error instead of
    /// delivering its data. Test hook for failure-propagation scenarios.
    pub fn inject_receive_failure(&mut self) {
        self.fail_next_receive = true;
    }

    fn sender(&self, peer: Rank) -> Result<&Sender<Packet>> {
        self.senders
            .get(&peer)
            .ok_or_else(|| SyncError::Configuration(format!("rank {peer} is not in the peer group")))
    }

    fn post(&self, peer: Rank, tag: Tag, bytes: Vec<u8>) -> Result<()> {
        self.sender(peer)?
            .send(Packet {
                from: self.rank,
                tag,
                bytes,
            })
            .map_err(|_| SyncError::Transport(format!("rank {peer} has left the peer group")))
    }

    /// Next packet with `tag` from any rank in `pending`, consulting the
    /// stash first and stashing everything else.
    fn next_packet(&mut self, tag: Tag, pending: &BTreeSet<Rank>) -> Result<Packet> {
        if let Some(pos) = self
            .stash
            .iter()
            .position(|p| p.tag == tag && pending.contains(&p.from))
        {
            return Ok(self.stash.remove(pos).expect("position just found"));
        }
        loop {
            let packet = self
                .inbox
                .recv()
                .map_err(|_| SyncError::Transport("peer group disconnected".into()))?;
            if packet.tag == tag && pending.contains(&packet.from) {
                return Ok(packet);
            }
            self.stash.push_back(packet);
        }
    }

    fn blocks(&self, ty: TypeHandle) -> Result<Vec<TypeBlock>> {
        self.types
            .get(ty.0)
            .and_then(|slot| slot.clone())
            .ok_or_else(|| SyncError::Configuration("derived type was freed".into()))
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn exchange(
        &mut self,
        tag: Tag,
        sends: &[SendPart<'_>],
        recvs: Vec<RecvPart<'_>>,
        on_receive: &mut dyn FnMut(Rank, &[u8]),
    ) -> Result<()> {
        // Receives are posted as expectations matched below.
        let mut pending: BTreeMap<Rank, RecvPart<'_>> = BTreeMap::new();
        for part in recvs {
            self.sender(part.peer)?;
            pending.insert(part.peer, part);
        }

        // Channel delivery buffers eagerly; synchronous-mode send semantics
        // are not emulated in process.
        for part in sends {
            self.post(part.peer, tag, part.bytes.to_vec())?;
        }

        // Complete receives one at a time, in arrival order. Failures are
        // recorded and the session keeps draining.
        let mut first_error: Option<SyncError> = None;
        while !pending.is_empty() {
            let waiting: BTreeSet<Rank> = pending.keys().copied().collect();
            let packet = self.next_packet(tag, &waiting)?;
            let part = pending
                .remove(&packet.from)
                .expect("packet matched a pending receive");

            if self.fail_next_receive {
                self.fail_next_receive = false;
                first_error.get_or_insert(SyncError::Transport(format!(
                    "receive from rank {} failed (injected)",
                    packet.from
                )));
                continue;
            }
            if packet.bytes.len() != part.bytes.len() {
                first_error.get_or_insert(SyncError::SizeMismatch {
                    peer: packet.from,
                    expected: part.bytes.len(),
                    actual: packet.bytes.len(),
                });
                continue;
            }
            part.bytes.copy_from_slice(&packet.bytes);
            on_receive(packet.from, part.bytes);
        }

        // Sends completed at post time.
        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    fn commit_type(&mut self, blocks: Vec<TypeBlock>) -> TypeHandle {
        self.types.push(Some(blocks));
        TypeHandle(self.types.len() - 1)
    }

    fn free_type(&mut self, ty: TypeHandle) {
        if let Some(slot) = self.types.get_mut(ty.0) {
            *slot = None;
        }
    }

    unsafe fn exchange_described(
        &mut self,
        tag: Tag,
        sends: &[DescribedSend],
        recvs: &[DescribedRecv],
    ) -> Result<()> {
        // Start all receives: they are matched against arriving packets
        // below.
        let mut pending: BTreeMap<Rank, &DescribedRecv> = BTreeMap::new();
        for recv in recvs {
            self.sender(recv.peer)?;
            pending.insert(recv.peer, recv);
        }

        // Start all sends: serialize each described region in block order.
        for send in sends {
            let blocks = self.blocks(send.ty)?;
            let total: usize = blocks.iter().map(|b| b.len).sum();
            let mut bytes = Vec::with_capacity(total);
            for block in &blocks {
                let src = send.base.offset(block.displacement);
                bytes.extend_from_slice(std::slice::from_raw_parts(src, block.len));
            }
            self.post(send.peer, tag, bytes)?;
        }

        // Sends completed at post time; wait for the receives.
        let mut first_error: Option<SyncError> = None;
        while !pending.is_empty() {
            let waiting: BTreeSet<Rank> = pending.keys().copied().collect();
            let packet = self.next_packet(tag, &waiting)?;
            let recv = pending
                .remove(&packet.from)
                .expect("packet matched a pending receive");

            if self.fail_next_receive {
                self.fail_next_receive = false;
                first_error.get_or_insert(SyncError::Transport(format!(
                    "receive from rank {} failed (injected)",
                    packet.from
                )));
                continue;
            }
            let blocks = self.blocks(recv.ty)?;
            let expected: usize = blocks.iter().map(|b| b.len).sum();
            if packet.bytes.len() != expected {
                first_error.get_or_insert(SyncError::SizeMismatch {
                    peer: packet.from,
                    expected,
                    actual: packet.bytes.len(),
                });
                continue;
            }
            let mut offset = 0;
            for block in &blocks {
                let dst = recv.base.offset(block.displacement) as *mut u8;
                std::ptr::copy_nonoverlapping(packet.bytes.as_ptr().add(offset), dst, block.len);
                offset += block.len;
            }
        }

        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    fn all_reduce_min(&mut self, value: i32) -> Result<i32> {
        for peer in self.senders.keys().copied().collect::<Vec<_>>() {
            self.post(peer, REDUCE_TAG, value.to_le_bytes().to_vec())?;
        }
        let mut min = value;
        let mut pending: BTreeSet<Rank> = self.senders.keys().copied().collect();
        while !pending.is_empty() {
            let packet = self.next_packet(REDUCE_TAG, &pending)?;
            pending.remove(&packet.from);
            let raw: [u8; 4] = packet.bytes.as_slice().try_into().map_err(|_| {
                SyncError::Transport(format!("malformed reduction message from rank {}", packet.from))
            })?;
            min = min.min(i32::from_le_bytes(raw));
        }
        Ok(min)
    }
}
