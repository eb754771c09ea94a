//! Value-addressing policies for indexed containers.
//!
//! A [`CommPolicy`] tells the engines how a container stores its wire
//! values: the primitive scalar type, whether every entry holds exactly one
//! primitive or a variable run of them, how many primitives sit at an entry,
//! and where entry data lives in memory. The buffered engine uses the size
//! and value accessors; the datatype engine additionally uses the entry
//! addresses to describe scattered memory to the transport.

use bytemuck::{Pod, Zeroable};

/// Whether every entry of a container holds exactly one primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeKind {
    /// One primitive per entry.
    FixedOne,
    /// A per-entry number of primitives, queried through
    /// [`CommPolicy::size_at`].
    Variable,
}

/// Addressing policy of an indexed container.
///
/// The contract on addresses: `address_of(i)` points at the first primitive
/// of entry `i`, and the following `size_at(i)` primitives are stored
/// contiguously. Addresses must stay valid for the duration of a transfer.
pub trait CommPolicy {
    /// The atomic value moved on the wire.
    type Primitive: Pod;

    const SIZE_KIND: SizeKind;

    /// Number of primitives stored at entry `index`.
    fn size_at(&self, index: usize) -> usize;

    /// Read the `sub`-th primitive of entry `index`.
    fn value_at(&self, index: usize, sub: usize) -> Self::Primitive;

    /// Overwrite the `sub`-th primitive of entry `index`.
    fn set_value_at(&mut self, index: usize, sub: usize, value: Self::Primitive);

    /// Byte address of the first primitive of entry `index`.
    ///
    /// `index` may equal the entry count, in which case the one-past-the-end
    /// address is returned; it must not be dereferenced.
    fn address_of(&self, index: usize) -> *const u8;
}

impl<K: Pod> CommPolicy for Vec<K> {
    type Primitive = K;

    const SIZE_KIND: SizeKind = SizeKind::FixedOne;

    fn size_at(&self, _index: usize) -> usize {
        1
    }

    fn value_at(&self, index: usize, _sub: usize) -> K {
        self[index]
    }

    fn set_value_at(&mut self, index: usize, _sub: usize, value: K) {
        self[index] = value;
    }

    fn address_of(&self, index: usize) -> *const u8 {
        debug_assert!(index <= self.len());
        // In-bounds or one-past-the-end by the assertion above.
        unsafe { self.as_ptr().add(index) as *const u8 }
    }
}

/// Container holding a variable-length block of primitives per entry.
///
/// Blocks are stored back to back in one flat array with an offset table,
/// so a block is both indexable and contiguous in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockVector<K> {
    /// `offsets[i]` is where block i starts in `values`;
    /// `offsets[len]` is the total primitive count.
    offsets: Vec<usize>,
    values: Vec<K>,
}

impl<K: Pod> BlockVector<K> {
    /// A block vector with the given per-entry sizes, zero-initialized.
    pub fn with_sizes(sizes: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(sizes.len() + 1);
        let mut total = 0;
        offsets.push(0);
        for &size in sizes {
            total += size;
            offsets.push(total);
        }
        Self {
            offsets,
            values: vec![K::zeroed(); total],
        }
    }

    /// Build from explicit blocks.
    pub fn from_blocks(blocks: &[&[K]]) -> Self {
        let sizes: Vec<usize> = blocks.iter().map(|b| b.len()).collect();
        let mut out = Self::with_sizes(&sizes);
        for (i, block) in blocks.iter().enumerate() {
            out.block_mut(i).copy_from_slice(block);
        }
        out
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn block(&self, index: usize) -> &[K] {
        &self.values[self.offsets[index]..self.offsets[index + 1]]
    }

    pub fn block_mut(&mut self, index: usize) -> &mut [K] {
        &mut self.values[self.offsets[index]..self.offsets[index + 1]]
    }
}

impl<K: Pod> CommPolicy for BlockVector<K> {
    type Primitive = K;

    const SIZE_KIND: SizeKind = SizeKind::Variable;

    fn size_at(&self, index: usize) -> usize {
        self.offsets[index + 1] - self.offsets[index]
    }

    fn value_at(&self, index: usize, sub: usize) -> K {
        self.block(index)[sub]
    }

    fn set_value_at(&mut self, index: usize, sub: usize, value: K) {
        self.block_mut(index)[sub] = value;
    }

    fn address_of(&self, index: usize) -> *const u8 {
        let offset = self.offsets[index];
        debug_assert!(offset <= self.values.len());
        unsafe { self.values.as_ptr().add(offset) as *const u8 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_policy_is_fixed_one() {
        let v = vec![1.0f64, 2.0, 3.0];
        assert_eq!(<Vec<f64> as CommPolicy>::SIZE_KIND, SizeKind::FixedOne);
        assert_eq!(v.size_at(1), 1);
        assert_eq!(v.value_at(2, 0), 3.0);
    }

    #[test]
    fn vec_policy_addresses_are_contiguous() {
        let v = vec![1.0f64, 2.0, 3.0];
        let step = v.address_of(1) as usize - v.address_of(0) as usize;
        assert_eq!(step, std::mem::size_of::<f64>());
    }

    #[test]
    fn block_vector_sizes_and_values() {
        let bv = BlockVector::from_blocks(&[&[1.0f64, 2.0], &[3.0], &[4.0, 5.0, 6.0]]);
        assert_eq!(bv.len(), 3);
        assert_eq!(bv.size_at(0), 2);
        assert_eq!(bv.size_at(1), 1);
        assert_eq!(bv.size_at(2), 3);
        assert_eq!(bv.value_at(2, 1), 5.0);
    }

    #[test]
    fn block_vector_zero_sized_block() {
        let bv = BlockVector::<f64>::with_sizes(&[2, 0, 1]);
        assert_eq!(bv.size_at(1), 0);
        assert!(bv.block(1).is_empty());
        // The empty block still occupies a position with a valid address.
        assert_eq!(bv.address_of(1), bv.address_of(2));
    }

    #[test]
    fn block_vector_mutation_through_policy() {
        let mut bv = BlockVector::<f64>::with_sizes(&[1, 2]);
        bv.set_value_at(1, 1, 7.5);
        assert_eq!(bv.block(1), &[0.0, 7.5]);
    }
}
