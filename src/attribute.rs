//! Index attributes and attribute-set predicates.
//!
//! Every shared local index carries an [`Attribute`] describing its role in
//! the decomposition. Engines filter which indices participate in a
//! direction with an [`AttributeSet`] predicate.

/// Role of a shared local index in the domain decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// This process holds the authoritative value.
    Owner,
    /// A replicated value owned by another process.
    Copy,
    /// Part of the overlap region between subdomains.
    Overlap,
}

impl Attribute {
    fn bit(self) -> u8 {
        match self {
            Attribute::Owner => 1,
            Attribute::Copy => 2,
            Attribute::Overlap => 4,
        }
    }
}

/// Predicate over index attributes.
pub trait AttributeSet {
    fn contains(&self, attribute: Attribute) -> bool;
}

/// Contains every attribute.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllAttributes;

impl AttributeSet for AllAttributes {
    fn contains(&self, _attribute: Attribute) -> bool {
        true
    }
}

/// Contains no attribute.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAttributes;

impl AttributeSet for NoAttributes {
    fn contains(&self, _attribute: Attribute) -> bool {
        false
    }
}

/// Explicit attribute membership set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attributes(u8);

impl Attributes {
    pub fn of(attributes: &[Attribute]) -> Self {
        Self(attributes.iter().fold(0, |mask, a| mask | a.bit()))
    }
}

impl AttributeSet for Attributes {
    fn contains(&self, attribute: Attribute) -> bool {
        self.0 & attribute.bit() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_set_contains_everything() {
        for a in [Attribute::Owner, Attribute::Copy, Attribute::Overlap] {
            assert!(AllAttributes.contains(a));
            assert!(!NoAttributes.contains(a));
        }
    }

    #[test]
    fn explicit_set_membership() {
        let owners = Attributes::of(&[Attribute::Owner]);
        assert!(owners.contains(Attribute::Owner));
        assert!(!owners.contains(Attribute::Copy));

        let mixed = Attributes::of(&[Attribute::Copy, Attribute::Overlap]);
        assert!(mixed.contains(Attribute::Copy));
        assert!(mixed.contains(Attribute::Overlap));
        assert!(!mixed.contains(Attribute::Owner));
    }
}
