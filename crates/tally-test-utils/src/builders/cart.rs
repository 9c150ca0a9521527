//! Builder for cart items.

use tally_core::{
    CartItem, CreatedTripleInfo, Curve, Direction, NewObject, OpposingPosition, TermId,
};

/// Fluent builder for [`CartItem`].
///
/// Starts as a linear `for` vote of `1_000` on an existing object with no
/// relationship yet.
#[derive(Debug, Clone)]
pub struct CartItemBuilder {
    item: CartItem,
}

impl CartItemBuilder {
    /// Vote `id` using relationship kind `predicate`
    pub fn new(id: impl Into<String>, predicate: TermId) -> Self {
        Self {
            item: CartItem {
                id: id.into(),
                object_id: None,
                predicate_id: predicate,
                triple_id: None,
                counter_triple_id: None,
                direction: Direction::For,
                curve: Curve::Linear,
                amount: 1_000,
                opposing_position: None,
                new_object: None,
            },
        }
    }

    /// Target an existing object
    pub fn object(mut self, object: TermId) -> Self {
        self.item.object_id = Some(object);
        self.item.new_object = None;
        self
    }

    /// Target an object that must be created, in a category that exists
    pub fn new_object(
        mut self,
        name: impl Into<String>,
        category: impl Into<String>,
        category_id: Option<TermId>,
    ) -> Self {
        self.item.object_id = None;
        self.item.new_object = Some(NewObject {
            name: name.into(),
            category: category.into(),
            category_id,
        });
        self
    }

    /// Point at an existing relationship
    pub fn relationship(mut self, info: &CreatedTripleInfo) -> Self {
        self.item.triple_id = Some(info.triple_id.clone());
        self.item.counter_triple_id = Some(info.counter_triple_id.clone());
        self
    }

    /// Point at an existing relationship whose counter id is not known yet
    pub fn relationship_without_counter(mut self, triple_id: TermId) -> Self {
        self.item.triple_id = Some(triple_id);
        self.item.counter_triple_id = None;
        self
    }

    /// Vote on the counter side
    pub fn against(mut self) -> Self {
        self.item.direction = Direction::Against;
        self
    }

    /// Deposit into the progressive curve
    pub fn progressive(mut self) -> Self {
        self.item.curve = Curve::Progressive;
        self
    }

    /// Deposit amount
    pub fn amount(mut self, amount: u128) -> Self {
        self.item.amount = amount;
        self
    }

    /// Record a position already held by the caller
    pub fn opposing(mut self, direction: Direction, shares: u128, curve: Curve) -> Self {
        self.item.opposing_position = Some(OpposingPosition {
            direction,
            shares,
            curve,
        });
        self
    }

    /// Finish the item
    pub fn build(self) -> CartItem {
        self.item
    }
}
