use crate::types::{amount_string, Curve, Direction, TermId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A position the caller already holds on the opposite side of a vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpposingPosition {
    /// Side the position sits on
    pub direction: Direction,

    /// Shares the caller believes it holds
    #[serde(with = "amount_string")]
    pub shares: u128,

    /// Curve of the vault holding the shares
    pub curve: Curve,
}

/// Creation payload for an object that does not exist on the ledger yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewObject {
    /// Label of the object to create
    pub name: String,

    /// Label of the object's category
    pub category: String,

    /// Category id, or `None` when the category must be created too
    #[serde(default)]
    pub category_id: Option<TermId>,
}

/// A user's intended vote, as accumulated in the cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Stable cart item id
    pub id: String,

    /// Object the relationship points at, `None` if it must be created
    #[serde(default)]
    pub object_id: Option<TermId>,

    /// Relationship kind (predicate)
    pub predicate_id: TermId,

    /// Existing relationship id, `None` if the relationship must be created
    #[serde(default)]
    pub triple_id: Option<TermId>,

    /// Counter (against) side of the existing relationship
    #[serde(default)]
    pub counter_triple_id: Option<TermId>,

    /// Side of the vote
    pub direction: Direction,

    /// Curve the deposit goes into
    pub curve: Curve,

    /// Deposit amount in the smallest denomination
    #[serde(with = "amount_string")]
    pub amount: u128,

    /// Currently held position on the opposite side, if any
    #[serde(default)]
    pub opposing_position: Option<OpposingPosition>,

    /// Present when the object does not exist yet
    #[serde(default)]
    pub new_object: Option<NewObject>,
}

impl CartItem {
    /// Whether the target object already exists on the ledger
    #[inline]
    pub fn object_exists(&self) -> bool {
        self.new_object.is_none() && self.object_id.is_some()
    }

    /// Whether the target relationship already exists on the ledger
    #[inline]
    pub fn relationship_exists(&self) -> bool {
        self.object_exists() && self.triple_id.is_some()
    }

    /// Opposing position that has to be withdrawn before this deposit
    pub fn blocking_position(&self) -> Option<&OpposingPosition> {
        self.opposing_position
            .as_ref()
            .filter(|p| p.direction != self.direction && p.shares > 0)
    }

    /// Reference to the target object, resolved or still pending creation
    pub fn object_ref(&self) -> ObjectRef {
        match (&self.object_id, &self.new_object) {
            (Some(id), None) => ObjectRef::Existing(id.clone()),
            (_, Some(new_object)) => ObjectRef::Pending(new_object.name.clone()),
            // rejected by validate_shape before classification
            (None, None) => ObjectRef::Pending(self.id.clone()),
        }
    }

    /// Check the invariants every item must satisfy before execution
    pub fn validate_shape(&self) -> Result<(), String> {
        if self.amount == 0 {
            return Err("amount must be strictly positive".to_string());
        }
        if self.object_id.is_none() && self.new_object.is_none() {
            return Err("item references neither an existing nor a new object".to_string());
        }
        if let Some(new_object) = &self.new_object {
            if new_object.name.trim().is_empty() {
                return Err("new object name is empty".to_string());
            }
            if new_object.category_id.is_none() && new_object.category.trim().is_empty() {
                return Err("new object category is empty".to_string());
            }
        }
        Ok(())
    }

    /// Copy of the item with a different amount
    pub fn with_amount(&self, amount: u128) -> Self {
        Self {
            amount,
            ..self.clone()
        }
    }

    /// Copy of the item pointing at an object that now exists
    pub fn with_object_id(&self, object_id: TermId) -> Self {
        Self {
            object_id: Some(object_id),
            new_object: None,
            triple_id: None,
            counter_triple_id: None,
            ..self.clone()
        }
    }

    /// Copy of the item pointing at a relationship that now exists
    pub fn with_relationship(&self, triple_id: TermId, counter_triple_id: Option<TermId>) -> Self {
        Self {
            triple_id: Some(triple_id),
            counter_triple_id,
            ..self.clone()
        }
    }
}

/// Object position of a relationship key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectRef {
    /// Object exists with this id
    Existing(TermId),
    /// Object will be created under this label
    Pending(String),
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Existing(id) => write!(f, "{}", id),
            ObjectRef::Pending(label) => write!(f, "new:{}", label),
        }
    }
}

/// Deduplication key of a relationship: (subject, relationship kind, object).
///
/// Curve and direction are deliberately absent: they describe a deposit, not
/// the relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TripleKey {
    /// Subject of the relationship
    pub subject: TermId,
    /// Relationship kind
    pub predicate: TermId,
    /// Object of the relationship
    pub object: ObjectRef,
}

impl TripleKey {
    /// Key targeted by a cart item
    pub fn for_item(subject: &TermId, item: &CartItem) -> Self {
        Self {
            subject: subject.clone(),
            predicate: item.predicate_id.clone(),
            object: item.object_ref(),
        }
    }

    /// Object id, when the object exists
    pub fn resolved_object(&self) -> Option<&TermId> {
        match &self.object {
            ObjectRef::Existing(id) => Some(id),
            ObjectRef::Pending(_) => None,
        }
    }
}

impl fmt::Display for TripleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.predicate, self.object)
    }
}

/// Identifiers of a relationship created during this submission
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CreatedTripleInfo {
    /// The relationship's own (for) id
    pub triple_id: TermId,
    /// The counter (against) id
    pub counter_triple_id: TermId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn existing_item() -> CartItem {
        CartItem {
            id: "item-1".to_string(),
            object_id: Some(TermId::new("0xobject")),
            predicate_id: TermId::new("0xpredicate"),
            triple_id: Some(TermId::new("0xtriple")),
            counter_triple_id: Some(TermId::new("0xcounter")),
            direction: Direction::For,
            curve: Curve::Linear,
            amount: 1_000_000_000_000_000_000,
            opposing_position: None,
            new_object: None,
        }
    }

    #[test]
    fn test_persistence_round_trip_keeps_amounts() {
        let mut big = existing_item();
        big.amount = u128::MAX;
        big.opposing_position = Some(OpposingPosition {
            direction: Direction::Against,
            shares: 9_007_199_254_740_993, // 2^53 + 1
            curve: Curve::Progressive,
        });
        let items = vec![existing_item(), big];

        let json = serde_json::to_string(&items).unwrap();
        let back: Vec<CartItem> = serde_json::from_str(&json).unwrap();

        assert_eq!(back, items);
        assert!(json.contains("\"340282366920938463463374607431768211455\""));
        assert!(json.contains("\"9007199254740993\""));
    }

    #[test]
    fn test_deserialize_from_camel_case_storage() {
        let raw = r#"{
            "id": "a",
            "predicateId": "0xp",
            "direction": "for",
            "curve": "progressive",
            "amount": "500",
            "newObject": { "name": "Rust", "category": "Languages", "categoryId": null }
        }"#;
        let item: CartItem = serde_json::from_str(raw).unwrap();

        assert_eq!(item.amount, 500);
        assert!(!item.object_exists());
        assert!(!item.relationship_exists());
        assert_eq!(item.object_ref(), ObjectRef::Pending("Rust".to_string()));
    }

    #[test]
    fn test_validate_shape() {
        assert!(existing_item().validate_shape().is_ok());
        assert!(existing_item().with_amount(0).validate_shape().is_err());

        let mut orphan = existing_item();
        orphan.object_id = None;
        assert!(orphan.validate_shape().is_err());
    }

    #[test]
    fn test_blocking_position_only_for_opposite_nonzero() {
        let mut item = existing_item();
        item.direction = Direction::Against;
        item.opposing_position = Some(OpposingPosition {
            direction: Direction::For,
            shares: 10,
            curve: Curve::Linear,
        });
        assert!(item.blocking_position().is_some());

        item.opposing_position.as_mut().unwrap().shares = 0;
        assert!(item.blocking_position().is_none());

        item.opposing_position = Some(OpposingPosition {
            direction: Direction::Against,
            shares: 10,
            curve: Curve::Linear,
        });
        assert!(item.blocking_position().is_none());
    }

    #[test]
    fn test_triple_key_ignores_curve_and_direction() {
        let subject = TermId::new("0xsubject");
        let a = existing_item();
        let mut b = existing_item();
        b.curve = Curve::Progressive;
        b.direction = Direction::Against;

        assert_eq!(TripleKey::for_item(&subject, &a), TripleKey::for_item(&subject, &b));
    }
}
