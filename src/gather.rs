//! Gather/scatter callback pairs.
//!
//! A [`GatherScatter`] reads one primitive out of a container during
//! packing and writes one back during unpacking. The default
//! [`CopyGatherScatter`] just copies; [`AddGatherScatter`] accumulates into
//! the destination instead, which is what reduction-style synchronization
//! (e.g. summing contributions from copies into the owner) wants.
//!
//! Both callbacks must be pure with respect to every index other than the
//! one they are handed.

use crate::policy::CommPolicy;

/// Callback pair used by the engines to move values between containers and
/// staging memory. For fixed-size policies `sub` is always 0.
pub trait GatherScatter<V: CommPolicy> {
    fn gather(data: &V, index: usize, sub: usize) -> V::Primitive;

    fn scatter(data: &mut V, value: V::Primitive, index: usize, sub: usize);
}

/// Copies values verbatim in both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyGatherScatter;

impl<V: CommPolicy> GatherScatter<V> for CopyGatherScatter {
    fn gather(data: &V, index: usize, sub: usize) -> V::Primitive {
        data.value_at(index, sub)
    }

    fn scatter(data: &mut V, value: V::Primitive, index: usize, sub: usize) {
        data.set_value_at(index, sub, value);
    }
}

/// Adds arriving values onto the destination entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddGatherScatter;

impl<V> GatherScatter<V> for AddGatherScatter
where
    V: CommPolicy,
    V::Primitive: std::ops::Add<Output = V::Primitive>,
{
    fn gather(data: &V, index: usize, sub: usize) -> V::Primitive {
        data.value_at(index, sub)
    }

    fn scatter(data: &mut V, value: V::Primitive, index: usize, sub: usize) {
        let current = data.value_at(index, sub);
        data.set_value_at(index, sub, current + value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_round_trips_a_value() {
        let mut v = vec![1.0f64, 2.0];
        let value = <CopyGatherScatter as GatherScatter<Vec<f64>>>::gather(&v, 1, 0);
        <CopyGatherScatter as GatherScatter<Vec<f64>>>::scatter(&mut v, value, 0, 0);
        assert_eq!(v, vec![2.0, 2.0]);
    }

    #[test]
    fn add_accumulates_on_scatter() {
        let mut v = vec![1.0f64, 2.0];
        <AddGatherScatter as GatherScatter<Vec<f64>>>::scatter(&mut v, 5.0, 1, 0);
        assert_eq!(v, vec![1.0, 7.0]);
    }
}
