//! The single source of truth for money math. Both the cart read path and
//! checkout derive their figures from here; nothing else in the service
//! computes totals. All amounts are integer minor units (cents).

use crate::models::{Coupon, CouponKind};

pub const TAX_RATE_PERCENT: i64 = 10;
pub const FREE_SHIPPING_THRESHOLD: i64 = 100_00;
pub const FLAT_SHIPPING_FEE: i64 = 10_00;

/// One cart or order line as far as pricing is concerned.
#[derive(Debug, Clone, Copy)]
pub struct PricedLine {
    pub unit_price: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartTotals {
    pub total_items: i64,
    pub subtotal: i64,
    pub discount: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutTotals {
    pub subtotal: i64,
    pub tax: i64,
    pub shipping_cost: i64,
    pub discount: i64,
    pub total: i64,
}

/// Subtotal, coupon discount and pre-tax total for a set of line items.
///
/// A percentage coupon takes `discount`% of the subtotal; a fixed coupon is
/// capped at the subtotal so the total can never go negative.
pub fn cart_totals(lines: &[PricedLine], coupon: Option<&Coupon>) -> CartTotals {
    let total_items: i64 = lines.iter().map(|l| i64::from(l.quantity)).sum();
    let subtotal: i64 = lines
        .iter()
        .map(|l| l.unit_price * i64::from(l.quantity))
        .sum();

    let discount = match coupon {
        Some(c) => match c.kind {
            CouponKind::Percentage => subtotal * c.discount / 100,
            CouponKind::Fixed => c.discount.min(subtotal),
        },
        None => 0,
    };

    CartTotals {
        total_items,
        subtotal,
        discount,
        total: subtotal - discount,
    }
}

/// Frozen order totals: flat 10% tax on the subtotal, flat shipping fee
/// waived above the free-shipping threshold, coupon discount applied last.
pub fn checkout_totals(subtotal: i64, discount: i64) -> CheckoutTotals {
    let tax = subtotal * TAX_RATE_PERCENT / 100;
    let shipping_cost = if subtotal > FREE_SHIPPING_THRESHOLD {
        0
    } else {
        FLAT_SHIPPING_FEE
    };

    CheckoutTotals {
        subtotal,
        tax,
        shipping_cost,
        discount,
        total: subtotal + tax + shipping_cost - discount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coupon, CouponKind};

    fn line(unit_price: i64, quantity: i32) -> PricedLine {
        PricedLine {
            unit_price,
            quantity,
        }
    }

    fn coupon(kind: CouponKind, discount: i64) -> Coupon {
        Coupon {
            code: "TEST".into(),
            discount,
            kind,
        }
    }

    #[test]
    fn subtotal_is_the_sum_of_price_times_quantity() {
        let totals = cart_totals(&[line(12_50, 2), line(3_00, 3)], None);
        assert_eq!(totals.subtotal, 34_00);
        assert_eq!(totals.total_items, 5);
        assert_eq!(totals.discount, 0);
        assert_eq!(totals.total, 34_00);
    }

    #[test]
    fn empty_cart_totals_are_zero() {
        let totals = cart_totals(&[], None);
        assert_eq!(totals.total_items, 0);
        assert_eq!(totals.subtotal, 0);
        assert_eq!(totals.total, 0);
    }

    #[test]
    fn percentage_coupon_takes_a_share_of_the_subtotal() {
        let totals = cart_totals(&[line(50_00, 2)], Some(&coupon(CouponKind::Percentage, 25)));
        assert_eq!(totals.subtotal, 100_00);
        assert_eq!(totals.discount, 25_00);
        assert_eq!(totals.total, 75_00);
    }

    #[test]
    fn full_percentage_coupon_zeroes_the_total() {
        let totals = cart_totals(&[line(19_99, 1)], Some(&coupon(CouponKind::Percentage, 100)));
        assert_eq!(totals.discount, totals.subtotal);
        assert_eq!(totals.total, 0);
    }

    #[test]
    fn fixed_coupon_is_capped_at_the_subtotal() {
        // price 20, qty 3 -> subtotal 60; fixed 100 caps at 60 and total hits zero.
        let totals = cart_totals(&[line(20_00, 3)], Some(&coupon(CouponKind::Fixed, 100_00)));
        assert_eq!(totals.subtotal, 60_00);
        assert_eq!(totals.discount, 60_00);
        assert_eq!(totals.total, 0);
    }

    #[test]
    fn fixed_coupon_below_subtotal_is_taken_verbatim() {
        let totals = cart_totals(&[line(20_00, 3)], Some(&coupon(CouponKind::Fixed, 15_00)));
        assert_eq!(totals.discount, 15_00);
        assert_eq!(totals.total, 45_00);
    }

    #[test]
    fn checkout_over_threshold_ships_free() {
        // subtotal 150 -> tax 15, shipping 0, total 165.
        let totals = checkout_totals(150_00, 0);
        assert_eq!(totals.tax, 15_00);
        assert_eq!(totals.shipping_cost, 0);
        assert_eq!(totals.total, 165_00);
    }

    #[test]
    fn checkout_under_threshold_pays_the_flat_fee() {
        // subtotal 50 -> tax 5, shipping 10, total 65.
        let totals = checkout_totals(50_00, 0);
        assert_eq!(totals.tax, 5_00);
        assert_eq!(totals.shipping_cost, 10_00);
        assert_eq!(totals.total, 65_00);
    }

    #[test]
    fn threshold_is_strictly_greater_than() {
        assert_eq!(checkout_totals(100_00, 0).shipping_cost, FLAT_SHIPPING_FEE);
        assert_eq!(checkout_totals(100_01, 0).shipping_cost, 0);
    }

    #[test]
    fn discount_flows_through_to_the_checkout_total() {
        let totals = checkout_totals(80_00, 20_00);
        assert_eq!(totals.total, 80_00 + 8_00 + 10_00 - 20_00);
    }
}
