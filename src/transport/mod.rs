//! Transport abstraction over ranked message passing.
//!
//! Engines drive transfers through the [`Transport`] trait and never talk to
//! a concrete messaging layer directly. Two implementations ship with the
//! crate: [`LocalTransport`] connects ranks within one process over
//! channels, and `MpiTransport` (behind the `distributed` feature) maps the
//! contract onto MPI.
//!
//! Because non-blocking operations borrow their buffers, the contract is
//! expressed as *sessions*: one call posts every receive and every
//! synchronous-mode send of a transfer, completes receives one at a time
//! (invoking the caller's callback as each peer's data lands, so unpacking
//! overlaps remaining traffic), and finally waits for all sends. The same
//! confinement is what MPI bindings enforce with scoped requests.

mod local;
#[cfg(feature = "distributed")]
mod mpi;

pub use local::LocalTransport;
#[cfg(feature = "distributed")]
pub use mpi::MpiTransport;

use crate::error::Result;

/// Rank of a process within the peer group.
pub type Rank = i32;

/// Message tag separating independent communication sessions.
pub type Tag = i32;

/// Tag used by every buffered engine.
pub const BUFFERED_COMM_TAG: Tag = 233;

/// Tag used by every datatype engine.
pub const DATATYPE_COMM_TAG: Tag = 234;

/// One contiguous piece of a described memory region: `len` bytes starting
/// `displacement` bytes after the region base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeBlock {
    pub len: usize,
    pub displacement: isize,
}

/// Handle to a derived-type descriptor committed with the transport.
///
/// Handles stay valid until [`Transport::free_type`] and must be freed by
/// whoever committed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeHandle(pub(crate) usize);

/// Outbound half of one peer's buffered message.
#[derive(Debug)]
pub struct SendPart<'a> {
    pub peer: Rank,
    pub bytes: &'a [u8],
}

/// Inbound half of one peer's buffered message; `bytes` is the precomputed
/// landing slice and the arriving message must fill it exactly.
#[derive(Debug)]
pub struct RecvPart<'a> {
    pub peer: Rank,
    pub bytes: &'a mut [u8],
}

/// Outbound half of a described (in-place) transfer.
#[derive(Debug, Clone, Copy)]
pub struct DescribedSend {
    pub peer: Rank,
    pub base: *const u8,
    pub ty: TypeHandle,
}

/// Inbound half of a described (in-place) transfer.
#[derive(Debug, Clone, Copy)]
pub struct DescribedRecv {
    pub peer: Rank,
    pub base: *mut u8,
    pub ty: TypeHandle,
}

/// Ranked message passing as consumed by the engines.
pub trait Transport {
    /// This process's rank within the peer group.
    fn rank(&self) -> Rank;

    /// Number of processes in the peer group.
    fn size(&self) -> usize;

    /// Run one buffered exchange session.
    ///
    /// Receives are posted first, then one synchronous-mode send per entry
    /// of `sends`. Receives complete one at a time in arrival order;
    /// `on_receive` is invoked with the peer rank and its filled landing
    /// slice as soon as that peer's message is in. After the last receive
    /// the session waits for all sends.
    ///
    /// Zero-length parts still exchange an (empty) message. Per-peer
    /// failures are drained, not abandoned: the session always completes
    /// every posted operation before reporting the first error.
    fn exchange(
        &mut self,
        tag: Tag,
        sends: &[SendPart<'_>],
        recvs: Vec<RecvPart<'_>>,
        on_receive: &mut dyn FnMut(Rank, &[u8]),
    ) -> Result<()>;

    /// Commit a derived-type descriptor for later described sessions.
    fn commit_type(&mut self, blocks: Vec<TypeBlock>) -> TypeHandle;

    /// Release a committed descriptor. Freeing an already-freed handle is
    /// a no-op.
    fn free_type(&mut self, ty: TypeHandle);

    /// Run one described exchange session: start all receives, start all
    /// sends, wait for the sends, then wait for the receives. Data moves
    /// directly between the described regions without staging.
    ///
    /// # Safety
    ///
    /// Every `(base, ty)` pair must describe memory that is valid, disjoint
    /// from all other described regions of the session, and untouched by
    /// anything else until the call returns.
    unsafe fn exchange_described(
        &mut self,
        tag: Tag,
        sends: &[DescribedSend],
        recvs: &[DescribedRecv],
    ) -> Result<()>;

    /// Minimum of `value` over the whole peer group. Acts as a barrier: the
    /// call returns only once every rank has contributed.
    fn all_reduce_min(&mut self, value: i32) -> Result<i32>;
}
