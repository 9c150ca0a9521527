use crate::domain::cart::CartItem;
use crate::domain::ledger::ContractConfig;
use crate::error::{EngineError, Shortfall};
use tracing::debug;

/// Smallest amount an item may carry
pub fn minimum_for(item: &CartItem, contract: &ContractConfig) -> u128 {
    if item.relationship_exists() {
        contract.min_deposit
    } else {
        contract.min_create_and_deposit()
    }
}

/// Check every item against its minimum and return the adjusted list.
///
/// Items short by less than `tolerance` (display rounding dust) are raised to
/// exactly their minimum. Anything short by more fails the whole submission,
/// listing each offending item. The input is never modified and running the
/// result through again changes nothing.
pub fn validate_amounts(
    items: &[CartItem],
    contract: &ContractConfig,
    tolerance: u128,
) -> Result<Vec<CartItem>, EngineError> {
    let mut adjusted = Vec::with_capacity(items.len());
    let mut shortfalls = Vec::new();

    for item in items {
        let minimum = minimum_for(item, contract);
        if item.amount >= minimum {
            adjusted.push(item.clone());
            continue;
        }

        let deficit = minimum - item.amount;
        if deficit < tolerance {
            debug!(
                item_id = %item.id,
                amount = %item.amount,
                minimum = %minimum,
                "Rounding amount up to minimum"
            );
            adjusted.push(item.with_amount(minimum));
        } else {
            shortfalls.push(Shortfall {
                item_id: item.id.clone(),
                amount: item.amount,
                minimum,
                shortfall: deficit,
            });
        }
    }

    if shortfalls.is_empty() {
        Ok(adjusted)
    } else {
        Err(EngineError::AmountBelowMinimum(shortfalls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Curve, Direction, TermId};
    use pretty_assertions::assert_eq;

    const CONTRACT: ContractConfig = ContractConfig {
        object_cost: 1_000,
        triple_cost: 4_000,
        min_deposit: 100,
    };

    fn item(id: &str, amount: u128, existing: bool) -> CartItem {
        CartItem {
            id: id.to_string(),
            object_id: Some(TermId::new("0xobject")),
            predicate_id: TermId::new("0xpredicate"),
            triple_id: existing.then(|| TermId::new("0xtriple")),
            counter_triple_id: existing.then(|| TermId::new("0xcounter")),
            direction: Direction::For,
            curve: Curve::Linear,
            amount,
            opposing_position: None,
            new_object: None,
        }
    }

    #[test]
    fn test_minimum_depends_on_relationship_existence() {
        assert_eq!(minimum_for(&item("a", 1, true), &CONTRACT), 100);
        assert_eq!(minimum_for(&item("b", 1, false), &CONTRACT), 4_100);
    }

    #[test]
    fn test_dust_is_rounded_up() {
        let items = vec![item("existing", 95, true), item("new", 4_099, false)];
        let adjusted = validate_amounts(&items, &CONTRACT, 10).unwrap();

        assert_eq!(adjusted[0].amount, 100);
        assert_eq!(adjusted[1].amount, 4_100);
        // input untouched
        assert_eq!(items[0].amount, 95);
    }

    #[test]
    fn test_shortfall_reported_per_item() {
        let items = vec![
            item("ok", 500, true),
            item("short", 50, true),
            item("short-new", 1_000, false),
        ];

        match validate_amounts(&items, &CONTRACT, 10) {
            Err(EngineError::AmountBelowMinimum(shortfalls)) => {
                assert_eq!(
                    shortfalls,
                    vec![
                        Shortfall {
                            item_id: "short".to_string(),
                            amount: 50,
                            minimum: 100,
                            shortfall: 50,
                        },
                        Shortfall {
                            item_id: "short-new".to_string(),
                            amount: 1_000,
                            minimum: 4_100,
                            shortfall: 3_100,
                        },
                    ]
                );
            }
            other => panic!("Expected AmountBelowMinimum, got {:?}", other),
        }
    }

    #[test]
    fn test_deficit_equal_to_tolerance_is_rejected() {
        let items = vec![item("edge", 90, true)];
        assert!(validate_amounts(&items, &CONTRACT, 10).is_err());
    }

    #[test]
    fn test_adjustment_is_idempotent() {
        let items = vec![item("a", 97, true), item("b", 4_095, false), item("c", 7_000, false)];
        let once = validate_amounts(&items, &CONTRACT, 10).unwrap();
        let twice = validate_amounts(&once, &CONTRACT, 10).unwrap();
        assert_eq!(once, twice);
    }
}
