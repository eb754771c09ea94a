//! Solver-category dispatch: sequential no-op vs. parallel engines.
//!
//! An algebraic-multigrid or Krylov setup selects its synchronization
//! strategy from the parallel-information object attached to the solver.
//! The sequential variant never touches a transport: its operations are
//! identities and `global_sum(x)` returns `x` unchanged. The parallel
//! variants carry a transport plus the attribute predicates that decide
//! which local indices participate in each direction.

use crate::attribute::Attributes;
use crate::buffered::BufferedEngine;
use crate::datatype::DatatypeEngine;
use crate::error::Result;
use crate::gather::GatherScatter;
use crate::interface::Interface;
use crate::policy::CommPolicy;
use crate::transport::Transport;

/// Category of the solver the synchronization layer serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverCategory {
    /// Single process; no synchronization needed.
    Sequential,
    /// Subdomains overlap; copies exist on several processes.
    Overlapping,
    /// Disjoint subdomains with shared boundary indices.
    NonOverlapping,
}

/// Information object common to all categories.
pub trait SolverInformation {
    fn category(&self) -> SolverCategory;

    fn procs(&self) -> usize;
}

/// Parallel information for a single-process solver.
///
/// Every operation is an identity and nothing here ever calls into a
/// transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialInformation;

impl SequentialInformation {
    pub fn global_sum<K>(&self, value: K) -> K {
        value
    }

    /// Copying owner values to their copies is trivial on one process.
    pub fn copy_owner_to_all<V: CommPolicy>(&self, _source: &V, _dest: &mut V) {}

    pub fn build_global_lookup(&mut self, _size: usize) {}

    pub fn free_global_lookup(&mut self) {}
}

impl SolverInformation for SequentialInformation {
    fn category(&self) -> SolverCategory {
        SolverCategory::Sequential
    }

    fn procs(&self) -> usize {
        1
    }
}

/// Parallel information: the transport plus the attribute predicates
/// selecting which indices act as owners, copies, and overlap.
pub struct ParallelInformation<T: Transport> {
    transport: T,
    category: SolverCategory,
    owner_set: Attributes,
    copy_set: Attributes,
}

impl<T: Transport> ParallelInformation<T> {
    pub fn new(
        transport: T,
        category: SolverCategory,
        owner_set: Attributes,
        copy_set: Attributes,
    ) -> Self {
        debug_assert_ne!(category, SolverCategory::Sequential);
        Self {
            transport,
            category,
            owner_set,
            copy_set,
        }
    }

    pub fn owner_set(&self) -> Attributes {
        self.owner_set
    }

    pub fn copy_set(&self) -> Attributes {
        self.copy_set
    }

    /// Consume the information and hand its transport to a buffered engine.
    pub fn into_buffered_engine<'i>(self) -> BufferedEngine<'i, T> {
        BufferedEngine::new(self.transport)
    }

    /// Consume the information and hand its transport to a datatype engine.
    pub fn into_datatype_engine<'d, V: CommPolicy>(self) -> DatatypeEngine<'d, T, V> {
        DatatypeEngine::new(self.transport)
    }
}

impl<T: Transport> SolverInformation for ParallelInformation<T> {
    fn category(&self) -> SolverCategory {
        self.category
    }

    fn procs(&self) -> usize {
        self.transport.size()
    }
}

/// Tagged variant over the three categories.
pub enum CategoryInformation<T: Transport> {
    Sequential(SequentialInformation),
    Overlapping(ParallelInformation<T>),
    NonOverlapping(ParallelInformation<T>),
}

impl<T: Transport> CategoryInformation<T> {
    pub fn category(&self) -> SolverCategory {
        match self {
            CategoryInformation::Sequential(info) => info.category(),
            CategoryInformation::Overlapping(info) | CategoryInformation::NonOverlapping(info) => {
                info.category()
            }
        }
    }

    pub fn procs(&self) -> usize {
        match self {
            CategoryInformation::Sequential(info) => info.procs(),
            CategoryInformation::Overlapping(info) | CategoryInformation::NonOverlapping(info) => {
                info.procs()
            }
        }
    }

    /// Select the engine for this category.
    pub fn select_engine<'i>(self) -> SelectedEngine<'i, T> {
        match self {
            CategoryInformation::Sequential(_) => SelectedEngine::Sequential(SequentialEngine),
            CategoryInformation::Overlapping(info) | CategoryInformation::NonOverlapping(info) => {
                SelectedEngine::Buffered(info.into_buffered_engine())
            }
        }
    }
}

/// No-op engine used by sequential solvers.
///
/// All operations succeed without touching any data or transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialEngine;

impl SequentialEngine {
    pub fn build(&mut self, _interface: &Interface) -> Result<()> {
        Ok(())
    }

    pub fn forward<G, V>(&mut self, _data: &mut V) -> Result<()>
    where
        G: GatherScatter<V>,
        V: CommPolicy,
    {
        Ok(())
    }

    pub fn backward<G, V>(&mut self, _data: &mut V) -> Result<()>
    where
        G: GatherScatter<V>,
        V: CommPolicy,
    {
        Ok(())
    }

    pub fn free(&mut self) {}

    pub fn procs(&self) -> usize {
        1
    }
}

/// Engine chosen by [`CategoryInformation::select_engine`].
pub enum SelectedEngine<'i, T: Transport> {
    Sequential(SequentialEngine),
    Buffered(BufferedEngine<'i, T>),
}
