//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. `Money` and
/// `SaleCode` are value objects; `Item` and `Sale` are entities.
///
/// ```ignore
/// let a = Money::new(1_000);
/// let b = Money::new(1_000);
/// assert_eq!(a, b); // equal by value, not identity
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
