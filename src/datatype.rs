//! In-place synchronization engine built on derived-type descriptors.
//!
//! Instead of staging values, `build` describes each peer's scattered
//! entries to the transport as one derived type per (peer, direction):
//! for every participating local index, one (length, byte-displacement)
//! block relative to entry 0 of the container. Transfers then start the
//! persistent per-direction request plans and let the transport move the
//! data in place.
//!
//! Which indices participate is controlled by attribute predicates: an
//! index contributes to sends iff `source_flags` contains its attribute,
//! and to receives iff `dest_flags` does.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::mem;

use crate::attribute::AttributeSet;
use crate::error::{Result, SyncError};
use crate::interface::{RemoteIndex, RemoteIndexMap};
use crate::policy::CommPolicy;
use crate::transport::{
    DescribedRecv, DescribedSend, Rank, Transport, TypeBlock, TypeHandle, DATATYPE_COMM_TAG,
};

/// Descriptors committed with the transport for one peer.
struct PeerTypes {
    send: TypeHandle,
    recv: TypeHandle,
}

/// Persistent plan for one direction: receives listed before sends.
struct RequestPlan {
    recvs: Vec<DescribedRecv>,
    sends: Vec<DescribedSend>,
}

struct Built {
    types: BTreeMap<Rank, PeerTypes>,
    forward: RequestPlan,
    reverse: RequestPlan,
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

/// Engine that transfers directly between described container memory.
///
/// `build` takes both containers by mutable borrow and the engine keeps
/// those borrows for its whole lifetime, so nothing else can touch the
/// described memory between transfers. Drop the engine (or let it go out
/// of scope) to get the containers back.
pub struct DatatypeEngine<'d, T: Transport, V: CommPolicy> {
    transport: T,
    built: Option<Built>,
    _data: PhantomData<&'d mut V>,
}

impl<'d, T: Transport, V: CommPolicy> DatatypeEngine<'d, T, V> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            built: None,
            _data: PhantomData,
        }
    }

    /// Commit per-peer derived types over both containers and set up the
    /// forward and reverse request plans. Any previous build is released
    /// first.
    ///
    /// A forward transfer sends from `send_data` (indices selected by
    /// `source_flags`) and receives into `recv_data` (indices selected by
    /// `dest_flags`); backward swaps the two roles wholesale.
    pub fn build(
        &mut self,
        remote: &RemoteIndexMap,
        source_flags: &impl AttributeSet,
        send_data: &'d mut V,
        dest_flags: &impl AttributeSet,
        recv_data: &'d mut V,
    ) -> Result<()> {
        self.free();

        let rank = self.transport.rank();
        let group = self.transport.size();
        let elem = mem::size_of::<V::Primitive>();
        let send_base = send_data.address_of(0);
        let recv_base = recv_data.address_of(0) as *mut u8;

        let mut types = BTreeMap::new();
        let mut forward = RequestPlan {
            recvs: Vec::with_capacity(remote.num_peers()),
            sends: Vec::with_capacity(remote.num_peers()),
        };
        let mut reverse = RequestPlan {
            recvs: Vec::with_capacity(remote.num_peers()),
            sends: Vec::with_capacity(remote.num_peers()),
        };

        for (peer, indices) in remote.iter() {
            if peer == rank || peer < 0 || peer as usize >= group {
                self.release(types);
                return Err(SyncError::Configuration(format!(
                    "remote-index peer {peer} outside peer group of size {group}"
                )));
            }
            let send_ty = self
                .transport
                .commit_type(blocks_for(send_data, indices, source_flags, elem, send_base));
            let recv_ty = self.transport.commit_type(blocks_for(
                recv_data,
                indices,
                dest_flags,
                elem,
                recv_base,
            ));
            types.insert(
                peer,
                PeerTypes {
                    send: send_ty,
                    recv: recv_ty,
                },
            );

            forward.recvs.push(DescribedRecv {
                peer,
                base: recv_base,
                ty: recv_ty,
            });
            forward.sends.push(DescribedSend {
                peer,
                base: send_base,
                ty: send_ty,
            });
            reverse.recvs.push(DescribedRecv {
                peer,
                base: send_base as *mut u8,
                ty: send_ty,
            });
            reverse.sends.push(DescribedSend {
                peer,
                base: recv_base,
                ty: recv_ty,
            });
        }

        tracing::debug!(rank, peers = types.len(), "committed datatype maps");
        self.built = Some(Built {
            types,
            forward,
            reverse,
        });
        Ok(())
    }

    /// Transfer from the source side to the destination side.
    pub fn forward(&mut self) -> Result<()> {
        self.transfer(Direction::Forward)
    }

    /// Transfer from the destination side back to the source side.
    pub fn backward(&mut self) -> Result<()> {
        self.transfer(Direction::Backward)
    }

    /// Release request plans and commit-released derived types; the engine
    /// returns to the fresh state. Idempotent.
    pub fn free(&mut self) {
        if let Some(built) = self.built.take() {
            self.release(built.types);
        }
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    fn release(&mut self, types: BTreeMap<Rank, PeerTypes>) {
        for (_, peer_types) in types {
            self.transport.free_type(peer_types.send);
            self.transport.free_type(peer_types.recv);
        }
    }

    fn transfer(&mut self, direction: Direction) -> Result<()> {
        let rank = self.transport.rank();
        let built = self
            .built
            .as_ref()
            .ok_or_else(|| SyncError::Configuration("transfer started before build".into()))?;
        let plan = match direction {
            Direction::Forward => &built.forward,
            Direction::Backward => &built.reverse,
        };

        let mut success: i32 = 1;
        // Safety: the engine holds exclusive borrows of both containers for
        // its lifetime, and every committed block addresses an entry of one
        // of them.
        if let Err(error) = unsafe {
            self.transport
                .exchange_described(DATATYPE_COMM_TAG, &plan.sends, &plan.recvs)
        } {
            tracing::error!(rank, %error, "datatype exchange failed");
            success = 0;
        }

        let global = self.transport.all_reduce_min(success)?;
        if global == 0 {
            return Err(SyncError::Communication);
        }
        Ok(())
    }
}

impl<'d, T: Transport, V: CommPolicy> Drop for DatatypeEngine<'d, T, V> {
    fn drop(&mut self) {
        self.free();
    }
}

/// Collect the (length, displacement) blocks of the indices selected by
/// `flags`, in remote-index order.
fn blocks_for<V: CommPolicy>(
    data: &V,
    indices: &[RemoteIndex],
    flags: &impl AttributeSet,
    elem: usize,
    base: *const u8,
) -> Vec<TypeBlock> {
    indices
        .iter()
        .filter(|remote| flags.contains(remote.attribute))
        .map(|remote| TypeBlock {
            len: data.size_at(remote.local) * elem,
            displacement: data.address_of(remote.local) as isize - base as isize,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AllAttributes;
    use crate::transport::LocalTransport;

    fn single_rank_transport() -> LocalTransport {
        LocalTransport::connected(1).remove(0)
    }

    #[test]
    fn forward_before_build_is_a_configuration_error() {
        let mut engine: DatatypeEngine<'_, _, Vec<f64>> =
            DatatypeEngine::new(single_rank_transport());
        assert!(matches!(
            engine.forward(),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn empty_remote_map_builds_and_transfers_trivially() {
        let remote = RemoteIndexMap::new();
        let mut send = vec![1.0f64, 2.0];
        let mut recv = vec![0.0f64, 0.0];
        let mut engine = DatatypeEngine::new(single_rank_transport());
        engine
            .build(&remote, &AllAttributes, &mut send, &AllAttributes, &mut recv)
            .unwrap();
        assert!(engine.is_built());
        engine.forward().unwrap();
        engine.backward().unwrap();
        drop(engine);
        assert_eq!(send, vec![1.0, 2.0]);
        assert_eq!(recv, vec![0.0, 0.0]);
    }

    #[test]
    fn free_is_idempotent() {
        let remote = RemoteIndexMap::new();
        let mut send = vec![1.0f64];
        let mut recv = vec![0.0f64];
        let mut engine = DatatypeEngine::new(single_rank_transport());
        engine
            .build(&remote, &AllAttributes, &mut send, &AllAttributes, &mut recv)
            .unwrap();
        engine.free();
        engine.free();
        assert!(!engine.is_built());
    }

    #[test]
    fn build_rejects_peers_outside_the_group() {
        let mut remote = RemoteIndexMap::new();
        remote.insert(
            5,
            vec![RemoteIndex::new(0, crate::attribute::Attribute::Owner)],
        );
        let mut send = vec![1.0f64];
        let mut recv = vec![0.0f64];
        let mut engine = DatatypeEngine::new(single_rank_transport());
        let result = engine.build(&remote, &AllAttributes, &mut send, &AllAttributes, &mut recv);
        assert!(matches!(result, Err(SyncError::Configuration(_))));
        assert!(!engine.is_built());
    }
}
