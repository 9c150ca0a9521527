//! Cart classification: deduplication into unique relationships and
//! partitioning of items by the work they need before a deposit.

use crate::domain::cart::{CartItem, TripleKey};
use crate::types::{Curve, TermId};
use std::collections::BTreeMap;

/// Curves used by the deposits grouped under one relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveMix {
    /// Every deposit targets the linear curve
    LinearOnly,
    /// Every deposit targets the progressive curve
    ProgressiveOnly,
    /// Both curves appear
    Mixed,
}

impl CurveMix {
    /// Mix of a non-empty set of items
    pub fn of<'a>(items: impl IntoIterator<Item = &'a CartItem>) -> Self {
        let (mut linear, mut progressive) = (false, false);
        for item in items {
            match item.curve {
                Curve::Linear => linear = true,
                Curve::Progressive => progressive = true,
            }
        }
        match (linear, progressive) {
            (true, true) => CurveMix::Mixed,
            (false, true) => CurveMix::ProgressiveOnly,
            _ => CurveMix::LinearOnly,
        }
    }
}

/// Items targeting the same relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripleGroup {
    /// Deduplication key
    pub key: TripleKey,
    /// Items in the group, in cart order
    pub items: Vec<CartItem>,
    /// Curves used by the group
    pub curve_mix: CurveMix,
    /// Whether the relationship already exists
    pub relationship_exists: bool,
}

impl TripleGroup {
    /// Ids of the grouped items, in cart order
    pub fn item_ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.id.as_str()).collect()
    }
}

/// The work an item needs before it can be deposited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Object does not exist yet
    NeedsObject,
    /// Object exists, relationship does not
    NeedsRelationship,
    /// Relationship exists and an opposing position must be withdrawn first
    NeedsRedeem,
    /// Relationship exists, nothing blocks the deposit
    DirectDeposit,
}

/// Partition an item falls into. The checks run in order, so every item
/// lands in exactly one partition.
pub fn partition_of(item: &CartItem) -> Partition {
    if !item.object_exists() {
        Partition::NeedsObject
    } else if !item.relationship_exists() {
        Partition::NeedsRelationship
    } else if item.blocking_position().is_some() {
        Partition::NeedsRedeem
    } else {
        Partition::DirectDeposit
    }
}

/// Result of classifying a cart
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Unique relationships targeted by the cart
    pub groups: BTreeMap<TripleKey, TripleGroup>,
    /// Items whose object must be created
    pub needs_object: Vec<CartItem>,
    /// Items whose relationship must be created
    pub needs_relationship: Vec<CartItem>,
    /// Items that must withdraw an opposing position first
    pub needs_redeem: Vec<CartItem>,
    /// Items that can be deposited right away
    pub direct_deposit: Vec<CartItem>,
}

impl Classification {
    /// Number of classified items
    pub fn len(&self) -> usize {
        self.needs_object.len()
            + self.needs_relationship.len()
            + self.needs_redeem.len()
            + self.direct_deposit.len()
    }

    /// Whether nothing was classified
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any relationship has to be created, including those behind
    /// new objects
    pub fn creates_relationships(&self) -> bool {
        !self.needs_object.is_empty() || !self.needs_relationship.is_empty()
    }

    /// Whether the deposit phase has anything to do up front
    pub fn deposits_existing(&self) -> bool {
        !self.needs_redeem.is_empty() || !self.direct_deposit.is_empty()
    }
}

/// Group items by the relationship they target, keeping cart order inside
/// each group.
///
/// Items behind a new object are keyed by its label until the object has an
/// id, so the grouping is redone once objects are created.
pub fn group_by_triple(subject: &TermId, items: &[CartItem]) -> BTreeMap<TripleKey, TripleGroup> {
    let mut grouped: BTreeMap<TripleKey, Vec<CartItem>> = BTreeMap::new();
    for item in items {
        grouped
            .entry(TripleKey::for_item(subject, item))
            .or_default()
            .push(item.clone());
    }
    grouped
        .into_iter()
        .map(|(key, items)| {
            let group = TripleGroup {
                key: key.clone(),
                curve_mix: CurveMix::of(&items),
                relationship_exists: items.iter().all(CartItem::relationship_exists),
                items,
            };
            (key, group)
        })
        .collect()
}

/// Classify a cart for the given subject. Pure.
pub fn classify(subject: &TermId, items: &[CartItem]) -> Classification {
    let mut classification = Classification {
        groups: group_by_triple(subject, items),
        ..Classification::default()
    };

    for item in items {
        let bucket = match partition_of(item) {
            Partition::NeedsObject => &mut classification.needs_object,
            Partition::NeedsRelationship => &mut classification.needs_relationship,
            Partition::NeedsRedeem => &mut classification.needs_redeem,
            Partition::DirectDeposit => &mut classification.direct_deposit,
        };
        bucket.push(item.clone());
    }

    classification
}
