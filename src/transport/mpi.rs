//! MPI-backed transport.
//!
//! Requires the `distributed` feature and an MPI installation. The caller
//! initializes MPI (`mpi::initialize()`) before constructing the transport
//! and keeps the universe alive for its lifetime.
//!
//! Sessions are confined to an rsmpi request scope: receives are posted
//! first, then synchronous-mode sends, receives are completed one at a
//! time by polling (wait-any semantics) with the unpack callback invoked
//! as each lands, and finally all sends are waited for. Derived types map
//! onto `MPI_Type_create_hindexed` over byte blocks, so the on-wire
//! primitive sequence is identical to the buffered engine's.
//!
//! rsmpi exposes no persistent requests; committed datatypes persist
//! across sessions and the point-to-point operations are re-posted per
//! transfer.

use mpi::collective::SystemOperation;
use mpi::datatype::{DatatypeRef, DynBuffer, DynBufferMut, UserDatatype};
use mpi::request::scope;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::{Address, Count};

use crate::error::{Result, SyncError};

use super::{
    DescribedRecv, DescribedSend, Rank, RecvPart, SendPart, Tag, Transport, TypeBlock, TypeHandle,
};

/// [`Transport`] over the MPI world communicator.
pub struct MpiTransport {
    world: SimpleCommunicator,
    types: Vec<Option<UserDatatype>>,
}

impl MpiTransport {
    /// Transport over the world communicator. MPI must already be
    /// initialized.
    pub fn world() -> Self {
        Self {
            world: SimpleCommunicator::world(),
            types: Vec::new(),
        }
    }

    fn user_type(&self, ty: TypeHandle) -> Result<&UserDatatype> {
        self.types
            .get(ty.0)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| SyncError::Configuration("derived type was freed".into()))
    }
}

impl Transport for MpiTransport {
    fn rank(&self) -> Rank {
        self.world.rank()
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn exchange(
        &mut self,
        tag: Tag,
        sends: &[SendPart<'_>],
        recvs: Vec<RecvPart<'_>>,
        on_receive: &mut dyn FnMut(Rank, &[u8]),
    ) -> Result<()> {
        let mut failures: Vec<String> = Vec::new();
        scope(|sc| {
            // Post one receive per peer into its landing slice. The slice
            // pointer is remembered so the filled bytes can be handed to
            // the callback once the request has completed.
            let mut recv_requests = Vec::with_capacity(recvs.len());
            for part in recvs {
                let peer = part.peer;
                let ptr = part.bytes.as_ptr();
                let len = part.bytes.len();
                let process = self.world.process_at_rank(peer);
                let request = process.immediate_receive_into_with_tag(sc, part.bytes, tag);
                recv_requests.push(Some((peer, ptr, len, request)));
            }

            // Synchronous-mode sends surface interface mismatches as
            // deadlocks instead of silently buffering.
            let mut send_requests = Vec::with_capacity(sends.len());
            for part in sends {
                let process = self.world.process_at_rank(part.peer);
                send_requests
                    .push(process.immediate_synchronous_send_with_tag(sc, part.bytes, tag));
            }

            // Complete receives one at a time, unpacking each peer's data
            // while the remaining transfers are still in flight.
            let mut outstanding = recv_requests.len();
            while outstanding > 0 {
                for slot in recv_requests.iter_mut() {
                    if let Some((peer, ptr, len, request)) = slot.take() {
                        match request.test() {
                            Ok(status) => {
                                outstanding -= 1;
                                let received =
                                    status.count(u8::equivalent_datatype()) as usize;
                                if received != len {
                                    failures.push(format!(
                                        "message from rank {peer} has {received} bytes, expected {len}"
                                    ));
                                    continue;
                                }
                                // The request is complete and dropped, so
                                // the landing slice is accessible again.
                                let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
                                on_receive(peer, bytes);
                            }
                            Err(request) => *slot = Some((peer, ptr, len, request)),
                        }
                    }
                }
            }
            // All receives are drained; wait for the sends.
            for request in send_requests {
                request.wait();
            }
        });

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Transport(failures.join("; ")))
        }
    }

    fn commit_type(&mut self, blocks: Vec<TypeBlock>) -> TypeHandle {
        let lengths: Vec<Count> = blocks.iter().map(|b| b.len as Count).collect();
        let displacements: Vec<Address> =
            blocks.iter().map(|b| b.displacement as Address).collect();
        let datatype = UserDatatype::heterogeneous_indexed(
            &lengths,
            &displacements,
            &u8::equivalent_datatype(),
        );
        self.types.push(Some(datatype));
        TypeHandle(self.types.len() - 1)
    }

    fn free_type(&mut self, ty: TypeHandle) {
        if let Some(slot) = self.types.get_mut(ty.0) {
            // Dropping the UserDatatype releases the committed MPI type.
            *slot = None;
        }
    }

    unsafe fn exchange_described(
        &mut self,
        tag: Tag,
        sends: &[DescribedSend],
        recvs: &[DescribedRecv],
    ) -> Result<()> {
        // Resolve descriptors up front so the session below cannot fail
        // halfway through posting. The raw handles stay committed until
        // `free_type`, which outlives the session.
        let mut recv_buffers = Vec::with_capacity(recvs.len());
        for recv in recvs {
            let datatype = DatatypeRef::from_raw(self.user_type(recv.ty)?.as_raw());
            recv_buffers.push((
                recv.peer,
                DynBufferMut::from_raw(recv.base, 1, datatype),
            ));
        }
        let mut send_buffers = Vec::with_capacity(sends.len());
        for send in sends {
            let datatype = DatatypeRef::from_raw(self.user_type(send.ty)?.as_raw());
            send_buffers.push((
                send.peer,
                DynBuffer::from_raw(send.base, 1, datatype),
            ));
        }

        scope(|sc| {
            // Start all receives, then all synchronous-mode sends.
            let mut recv_requests = Vec::with_capacity(recv_buffers.len());
            for (peer, buffer) in recv_buffers.iter_mut() {
                let process = self.world.process_at_rank(*peer);
                recv_requests.push(process.immediate_receive_into_with_tag(sc, buffer, tag));
            }
            let mut send_requests = Vec::with_capacity(send_buffers.len());
            for (peer, buffer) in send_buffers.iter() {
                let process = self.world.process_at_rank(*peer);
                send_requests.push(process.immediate_synchronous_send_with_tag(sc, buffer, tag));
            }

            // Sends complete first, then the receives.
            for request in send_requests {
                request.wait();
            }
            for request in recv_requests {
                request.wait();
            }
        });
        Ok(())
    }

    fn all_reduce_min(&mut self, value: i32) -> Result<i32> {
        let mut global = 0i32;
        self.world
            .all_reduce_into(&value, &mut global, SystemOperation::min());
        Ok(global)
    }
}
