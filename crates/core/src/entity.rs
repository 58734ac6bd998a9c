//! Records with identity.

/// A persisted record identified by a row id.
///
/// Items, sale headers and sale lines are entities: two values with the same
/// id describe the same row, whatever their other fields say.
pub trait Entity {
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Whether both values describe the same row (possibly at different times).
    fn same_row(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ItemId;

    struct Row {
        id: ItemId,
        stock: i64,
    }

    impl Entity for Row {
        type Id = ItemId;

        fn id(&self) -> &ItemId {
            &self.id
        }
    }

    #[test]
    fn identity_ignores_other_fields() {
        let before = Row { id: ItemId::new(3), stock: 5 };
        let after = Row { id: ItemId::new(3), stock: 2 };
        let other = Row { id: ItemId::new(4), stock: 5 };
        assert!(before.same_row(&after));
        assert!(!before.same_row(&other));
        assert_ne!(before.stock, after.stock);
    }
}
