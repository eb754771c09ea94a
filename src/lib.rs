//! Synchronization engine for distributed indexed containers.
//!
//! Parallel iterative solvers slice a globally indexed container (a block
//! vector, say) across processes, with some entries replicated on or owned
//! by peers. This crate moves the values of those shared entries between
//! processes: given a precomputed [`Interface`](interface::Interface)
//! naming, per peer, the local indices flowing out and in, an engine builds
//! the send/receive plan and drives transfers in either direction through
//! caller-supplied gather/scatter callbacks.
//!
//! Two interchangeable strategies are provided:
//!
//! - [`BufferedEngine`](buffered::BufferedEngine) packs values into
//!   contiguous staging areas, exchanges raw byte messages, and unpacks
//!   into the destinations.
//! - [`DatatypeEngine`](datatype::DatatypeEngine) describes the scattered
//!   memory to the transport as derived types, so transfers happen in
//!   place.
//!
//! Messaging itself sits behind the [`Transport`](transport::Transport)
//! trait: `LocalTransport` connects ranks within one process (and backs the
//! test suite), while the `distributed` feature adds an MPI-backed
//! transport. Solvers that run on one process pick the no-op sequential
//! path via [`selector`].

pub mod attribute;
pub mod buffered;
pub mod datatype;
pub mod error;
pub mod gather;
pub mod interface;
pub mod policy;
pub mod selector;
pub mod transport;

pub use attribute::{AllAttributes, Attribute, AttributeSet, Attributes, NoAttributes};
pub use buffered::BufferedEngine;
pub use datatype::DatatypeEngine;
pub use error::{Result, SyncError};
pub use gather::{AddGatherScatter, CopyGatherScatter, GatherScatter};
pub use interface::{Interface, InterfaceInfo, RemoteIndex, RemoteIndexMap};
pub use policy::{BlockVector, CommPolicy, SizeKind};
pub use transport::{LocalTransport, Rank, Transport};
