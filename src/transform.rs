//! Run-level value transforms: currency multiplier, markup and rounding

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use vendor_sync_types::FactValues;

use crate::source::RawRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    #[default]
    HalfUp,
    HalfEven,
    Down,
    Up,
}

impl Rounding {
    fn strategy(self) -> RoundingStrategy {
        match self {
            Rounding::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            Rounding::HalfEven => RoundingStrategy::MidpointNearestEven,
            Rounding::Down => RoundingStrategy::ToZero,
            Rounding::Up => RoundingStrategy::AwayFromZero,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTransform {
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
    /// Percentage added after the multiplier (10 = +10%)
    #[serde(default)]
    pub markup_pct: Decimal,
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u32,
    #[serde(default)]
    pub rounding: Rounding,
    /// Report negative vendor inventory as zero
    #[serde(default = "default_clamp")]
    pub clamp_negative_inventory: bool,
}

fn default_multiplier() -> Decimal {
    Decimal::ONE
}

fn default_decimal_places() -> u32 {
    2
}

fn default_clamp() -> bool {
    true
}

impl Default for PriceTransform {
    fn default() -> Self {
        Self {
            multiplier: default_multiplier(),
            markup_pct: Decimal::ZERO,
            decimal_places: default_decimal_places(),
            rounding: Rounding::default(),
            clamp_negative_inventory: default_clamp(),
        }
    }
}

impl PriceTransform {
    pub fn with_multiplier(multiplier: Decimal) -> Self {
        Self {
            multiplier,
            ..Default::default()
        }
    }

    /// Priced cost, or `None` when the arithmetic leaves the decimal range
    pub fn cost(&self, raw: Decimal) -> Option<Decimal> {
        let hundred = Decimal::ONE_HUNDRED;
        let marked_up = raw
            .checked_mul(self.multiplier)?
            .checked_mul(hundred.checked_add(self.markup_pct)?)?
            .checked_div(hundred)?;
        let mut cost =
            marked_up.round_dp_with_strategy(self.decimal_places, self.rounding.strategy());
        // Fixed scale so audit output reads 15.00, not 15
        cost.rescale(self.decimal_places);
        Some(cost)
    }

    pub fn inventory(&self, qty: i64) -> i64 {
        if self.clamp_negative_inventory {
            qty.max(0)
        } else {
            qty
        }
    }

    /// Target values for a source record. `None` if its cost cannot be priced.
    pub fn apply(&self, record: &RawRecord) -> Option<FactValues> {
        let cost = match record.cost {
            Some(raw) => Some(self.cost(raw)?),
            None => None,
        };
        Some(FactValues {
            cost,
            inventory_qty: record.inventory_qty.map(|q| self.inventory(q)),
            inventory_text: record.inventory_text.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_multiplier() {
        let t = PriceTransform::with_multiplier(dec("1.5"));
        assert_eq!(t.cost(dec("10.00")), Some(dec("15.00")));
        assert_eq!(t.cost(dec("10")).unwrap().to_string(), "15.00");
    }

    #[test]
    fn test_markup_and_rounding() {
        let t = PriceTransform {
            multiplier: dec("1.0"),
            markup_pct: dec("10"),
            ..Default::default()
        };
        // 9.99 * 1.10 = 10.989
        assert_eq!(t.cost(dec("9.99")), Some(dec("10.99")));

        let down = PriceTransform {
            rounding: Rounding::Down,
            ..t.clone()
        };
        assert_eq!(down.cost(dec("9.99")), Some(dec("10.98")));
    }

    #[test]
    fn test_half_even() {
        let t = PriceTransform {
            rounding: Rounding::HalfEven,
            ..Default::default()
        };
        assert_eq!(t.cost(dec("0.125")), Some(dec("0.12")));
        let up = PriceTransform::default();
        assert_eq!(up.cost(dec("0.125")), Some(dec("0.13")));
    }

    #[test]
    fn test_apply_keeps_absent_values_absent() {
        let t = PriceTransform::with_multiplier(dec("2"));
        let values = t
            .apply(&RawRecord {
                inventory_qty: Some(-4),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(values.cost, None);
        assert_eq!(values.inventory_qty, Some(0));
        assert_eq!(values.inventory_text, None);
    }

    #[test]
    fn test_cost_out_of_decimal_range() {
        let t = PriceTransform::with_multiplier(dec("1.5"));
        let huge = dec("70000000000000000000000000000");
        assert_eq!(t.cost(huge), None);
        assert_eq!(
            t.apply(&RawRecord {
                cost: Some(huge),
                ..Default::default()
            }),
            None
        );
        assert_eq!(t.cost(dec("1.00")), Some(dec("1.50")));
    }
}
