//! Buffered synchronization engine: gather, exchange raw bytes, scatter.
//!
//! `build` walks the interface once and precomputes, per peer, the byte
//! slice each direction occupies in a pair of contiguous staging areas.
//! A forward transfer gathers outbound values into the send staging in
//! peer-iteration order, exchanges one raw byte message per peer, and
//! scatters each peer's data as soon as it arrives. Backward swaps the
//! roles of the two staging areas and of the index lists.

use std::collections::BTreeMap;
use std::mem;

use crate::error::{Result, SyncError};
use crate::gather::GatherScatter;
use crate::interface::{Interface, InterfaceInfo};
use crate::policy::{CommPolicy, SizeKind};
use crate::transport::{Rank, RecvPart, SendPart, Transport, BUFFERED_COMM_TAG};

/// Byte range of one peer's message within a staging area.
#[derive(Debug, Clone, Copy)]
struct MessageSlice {
    start: usize,
    len: usize,
}

/// Staging slices for both directions of one peer.
#[derive(Debug, Clone, Copy)]
struct PeerLayout {
    outbound: MessageSlice,
    inbound: MessageSlice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Layout and staging built for one interface; dropped wholesale by `free`.
struct Plan<'i> {
    interface: &'i Interface,
    layout: BTreeMap<Rank, PeerLayout>,
    /// `buffers[0]` backs the outbound slices, `buffers[1]` the inbound
    /// ones. A backward transfer sends from `buffers[1]`.
    buffers: [Vec<u8>; 2],
    elem_size: usize,
}

/// Pack/exchange/unpack engine over a [`Transport`].
pub struct BufferedEngine<'i, T: Transport> {
    transport: T,
    plan: Option<Plan<'i>>,
}

impl<'i, T: Transport> BufferedEngine<'i, T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            plan: None,
        }
    }

    /// Build layout and staging for `interface` under a fixed-size policy.
    ///
    /// Every entry moves exactly one primitive, so slice lengths follow
    /// from the list lengths alone. Variable-size policies must use
    /// [`build_with_layout`](Self::build_with_layout).
    pub fn build<V: CommPolicy>(&mut self, interface: &'i Interface) -> Result<()> {
        if V::SIZE_KIND == SizeKind::Variable {
            return Err(SyncError::Configuration(
                "variable-size policy requires build_with_layout".into(),
            ));
        }
        self.build_plan::<V>(interface, |info| info.len(), |info| info.len())
    }

    /// Build layout and staging, sizing slices from layout witnesses.
    ///
    /// `source` sizes the outbound lists and `dest` the inbound ones.
    /// Containers used in later transfers must match the witnesses
    /// index-for-index. Valid for both size kinds.
    pub fn build_with_layout<V: CommPolicy>(
        &mut self,
        source: &V,
        dest: &V,
        interface: &'i Interface,
    ) -> Result<()> {
        self.build_plan::<V>(
            interface,
            |info| info.iter().map(|index| source.size_at(index)).sum(),
            |info| info.iter().map(|index| dest.size_at(index)).sum(),
        )
    }

    fn build_plan<V: CommPolicy>(
        &mut self,
        interface: &'i Interface,
        out_size: impl Fn(&InterfaceInfo) -> usize,
        in_size: impl Fn(&InterfaceInfo) -> usize,
    ) -> Result<()> {
        self.free();

        let rank = self.transport.rank();
        let group = self.transport.size();
        let elem_size = mem::size_of::<V::Primitive>();
        let mut layout = BTreeMap::new();
        let mut out_total = 0;
        let mut in_total = 0;
        for (peer, pair) in interface.iter() {
            if peer == rank || peer < 0 || peer as usize >= group {
                return Err(SyncError::Configuration(format!(
                    "interface peer {peer} outside peer group of size {group}"
                )));
            }
            let out_len = out_size(&pair.outgoing) * elem_size;
            let in_len = in_size(&pair.incoming) * elem_size;
            layout.insert(
                peer,
                PeerLayout {
                    outbound: MessageSlice {
                        start: out_total,
                        len: out_len,
                    },
                    inbound: MessageSlice {
                        start: in_total,
                        len: in_len,
                    },
                },
            );
            out_total += out_len;
            in_total += in_len;
        }

        tracing::debug!(rank, peers = layout.len(), out_total, in_total, "built message layout");
        self.plan = Some(Plan {
            interface,
            layout,
            buffers: [vec![0; out_total], vec![0; in_total]],
            elem_size,
        });
        Ok(())
    }

    /// Send values gathered from `source` over the outgoing lists and
    /// scatter arriving values into `dest` over the incoming lists.
    pub fn forward<G, V>(&mut self, source: &V, dest: &mut V) -> Result<()>
    where
        G: GatherScatter<V>,
        V: CommPolicy,
    {
        self.gather::<G, V>(source, Direction::Forward)?;
        self.exchange_and_scatter::<G, V>(dest, Direction::Forward)
    }

    /// Reverse transfer: gather from `source` over the incoming lists,
    /// scatter into `dest` over the outgoing ones. The roles of the two
    /// staging areas swap.
    pub fn backward<G, V>(&mut self, source: &V, dest: &mut V) -> Result<()>
    where
        G: GatherScatter<V>,
        V: CommPolicy,
    {
        self.gather::<G, V>(source, Direction::Backward)?;
        self.exchange_and_scatter::<G, V>(dest, Direction::Backward)
    }

    /// Forward transfer where source and destination are the same
    /// container. Safe whenever gather-then-scatter on one container is
    /// acceptable under `G`.
    pub fn forward_in_place<G, V>(&mut self, data: &mut V) -> Result<()>
    where
        G: GatherScatter<V>,
        V: CommPolicy,
    {
        self.gather::<G, V>(data, Direction::Forward)?;
        self.exchange_and_scatter::<G, V>(data, Direction::Forward)
    }

    /// Backward transfer where source and destination are the same
    /// container.
    pub fn backward_in_place<G, V>(&mut self, data: &mut V) -> Result<()>
    where
        G: GatherScatter<V>,
        V: CommPolicy,
    {
        self.gather::<G, V>(data, Direction::Backward)?;
        self.exchange_and_scatter::<G, V>(data, Direction::Backward)
    }

    /// Release layout and staging; the engine returns to the fresh state.
    /// Idempotent.
    pub fn free(&mut self) {
        self.plan = None;
    }

    pub fn is_built(&self) -> bool {
        self.plan.is_some()
    }

    fn checked_plan<'p, V: CommPolicy>(plan: &'p mut Option<Plan<'i>>) -> Result<&'p mut Plan<'i>> {
        let plan = plan
            .as_mut()
            .ok_or_else(|| SyncError::Configuration("transfer started before build".into()))?;
        if plan.elem_size != mem::size_of::<V::Primitive>() {
            return Err(SyncError::Configuration(
                "container primitive size differs from the built layout".into(),
            ));
        }
        Ok(plan)
    }

    /// Fill the sending staging area for `direction`. The write cursor
    /// visits peers in the same order `build` did, so offsets match the
    /// layout.
    fn gather<G, V>(&mut self, source: &V, direction: Direction) -> Result<()>
    where
        G: GatherScatter<V>,
        V: CommPolicy,
    {
        let plan = Self::checked_plan::<V>(&mut self.plan)?;
        let elem = plan.elem_size;
        let staging = match direction {
            Direction::Forward => &mut plan.buffers[0],
            Direction::Backward => &mut plan.buffers[1],
        };

        let mut cursor = 0;
        for (_, pair) in plan.interface.iter() {
            let list = match direction {
                Direction::Forward => &pair.outgoing,
                Direction::Backward => &pair.incoming,
            };
            for index in list.iter() {
                for sub in 0..source.size_at(index) {
                    let value = G::gather(source, index, sub);
                    staging[cursor..cursor + elem].copy_from_slice(bytemuck::bytes_of(&value));
                    cursor += elem;
                }
            }
        }
        debug_assert_eq!(cursor, staging.len());
        Ok(())
    }

    fn exchange_and_scatter<G, V>(&mut self, dest: &mut V, direction: Direction) -> Result<()>
    where
        G: GatherScatter<V>,
        V: CommPolicy,
    {
        let rank = self.transport.rank();
        let plan = Self::checked_plan::<V>(&mut self.plan)?;
        let elem = plan.elem_size;
        let interface: &Interface = plan.interface;
        let layout = &plan.layout;

        let [first, second] = &mut plan.buffers;
        let (send_buf, recv_buf): (&mut Vec<u8>, &mut Vec<u8>) = match direction {
            Direction::Forward => (first, second),
            Direction::Backward => (second, first),
        };

        let mut sends = Vec::with_capacity(layout.len());
        for (peer, peer_layout) in layout.iter() {
            let slice = match direction {
                Direction::Forward => peer_layout.outbound,
                Direction::Backward => peer_layout.inbound,
            };
            sends.push(SendPart {
                peer: *peer,
                bytes: &send_buf[slice.start..slice.start + slice.len],
            });
        }

        // The directional slices tile their staging area in peer order, so
        // the landing slices can be split off one after the other.
        let mut recvs = Vec::with_capacity(layout.len());
        let mut remainder = recv_buf.as_mut_slice();
        let mut consumed = 0;
        for (peer, peer_layout) in layout.iter() {
            let slice = match direction {
                Direction::Forward => peer_layout.inbound,
                Direction::Backward => peer_layout.outbound,
            };
            debug_assert_eq!(slice.start, consumed);
            let (head, tail) = mem::take(&mut remainder).split_at_mut(slice.len);
            recvs.push(RecvPart {
                peer: *peer,
                bytes: head,
            });
            remainder = tail;
            consumed += slice.len;
        }

        // Scatter each peer's data as soon as its receive completes; the
        // unpack overlaps the remaining network transfer.
        let mut on_receive = |peer: Rank, bytes: &[u8]| {
            let Some(pair) = interface.get(peer) else {
                debug_assert!(false, "received from a peer outside the interface");
                return;
            };
            let list = match direction {
                Direction::Forward => &pair.incoming,
                Direction::Backward => &pair.outgoing,
            };
            let mut offset = 0;
            for index in list.iter() {
                for sub in 0..dest.size_at(index) {
                    let value = bytemuck::pod_read_unaligned(&bytes[offset..offset + elem]);
                    G::scatter(dest, value, index, sub);
                    offset += elem;
                }
            }
            debug_assert_eq!(offset, bytes.len());
        };

        let mut success: i32 = 1;
        if let Err(error) =
            self.transport
                .exchange(BUFFERED_COMM_TAG, &sends, recvs, &mut on_receive)
        {
            tracing::error!(rank, %error, "buffered exchange failed");
            success = 0;
        }

        // The min-reduction closes the transfer on every rank; all ranks
        // raise together or not at all.
        let global = self.transport.all_reduce_min(success)?;
        if global == 0 {
            return Err(SyncError::Communication);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gather::CopyGatherScatter;
    use crate::policy::BlockVector;
    use crate::transport::LocalTransport;

    fn single_rank_transport() -> LocalTransport {
        LocalTransport::connected(1).remove(0)
    }

    #[test]
    fn build_rejects_variable_policy_without_witnesses() {
        let interface = Interface::new();
        let mut engine = BufferedEngine::new(single_rank_transport());
        let result = engine.build::<BlockVector<f64>>(&interface);
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[test]
    fn forward_before_build_is_a_configuration_error() {
        let mut engine = BufferedEngine::new(single_rank_transport());
        let mut data = vec![1.0f64];
        let result = engine.forward_in_place::<CopyGatherScatter, Vec<f64>>(&mut data);
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[test]
    fn build_rejects_peers_outside_the_group() {
        let mut interface = Interface::new();
        interface.insert(3, vec![0], vec![0]);
        let mut engine = BufferedEngine::new(single_rank_transport());
        let result = engine.build::<Vec<f64>>(&interface);
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[test]
    fn free_is_idempotent_and_resets_to_fresh() {
        let interface = Interface::new();
        let mut engine = BufferedEngine::new(single_rank_transport());
        engine.build::<Vec<f64>>(&interface).unwrap();
        assert!(engine.is_built());
        engine.free();
        engine.free();
        assert!(!engine.is_built());
    }

    #[test]
    fn empty_interface_transfer_is_trivial() {
        let interface = Interface::new();
        let mut engine = BufferedEngine::new(single_rank_transport());
        engine.build::<Vec<f64>>(&interface).unwrap();
        let mut data = vec![1.0f64, 2.0];
        engine
            .forward_in_place::<CopyGatherScatter, Vec<f64>>(&mut data)
            .unwrap();
        assert_eq!(data, vec![1.0, 2.0]);
    }

    #[test]
    fn rebuild_releases_previous_plan_first() {
        let interface = Interface::new();
        let mut engine = BufferedEngine::new(single_rank_transport());
        engine.build::<Vec<f64>>(&interface).unwrap();
        engine.build::<Vec<f64>>(&interface).unwrap();
        assert!(engine.is_built());
    }

    #[test]
    fn forward_rejects_mismatched_primitive_size() {
        let interface = Interface::new();
        let mut engine = BufferedEngine::new(single_rank_transport());
        engine.build::<Vec<f64>>(&interface).unwrap();
        let mut data = vec![1.0f32];
        let result = engine.forward_in_place::<CopyGatherScatter, Vec<f32>>(&mut data);
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }
}
