//! Property-based tests for the slab tariff calculator
//!
//! Schedules are generated as ascending, non-overlapping slab lists with an
//! optional open-ended last slab, and consumption as decimals with up to two
//! fractional digits.

use connection_desk::tariff::{TariffSchedule, calculate};
use proptest::prelude::*;
use rust_decimal::Decimal;

// PROPERTY TEST STRATEGIES

/// Decimal with two fractional digits in `[0, max)`.
fn cents(max: i64) -> impl Strategy<Value = Decimal> {
    (0..max * 100).prop_map(|c| Decimal::new(c, 2))
}

fn units_strategy() -> impl Strategy<Value = Decimal> {
    (-50_000i64..500_000).prop_map(|c| Decimal::new(c, 2))
}

/// Ascending slabs, optionally with gaps between them.
fn schedule_strategy() -> impl Strategy<Value = TariffSchedule> {
    (
        prop::collection::vec((0u32..50, 1u32..400, 1u32..2_000), 1..6),
        any::<bool>(),
        cents(1_000),
        cents(20),
        cents(25),
    )
        .prop_map(|(bands, open_ended, fixed, duty, gst)| {
            let mut schedule = TariffSchedule::new(fixed, duty, gst);
            let mut cursor = Decimal::ZERO;
            let last = bands.len() - 1;
            for (index, (gap, width, rate)) in bands.into_iter().enumerate() {
                let start = cursor + Decimal::from(gap);
                let end = start + Decimal::from(width);
                let end = if open_ended && index == last { None } else { Some(end) };
                schedule = schedule.with_slab(start, end, Decimal::new(rate.into(), 2));
                cursor = end.unwrap_or(start);
            }
            schedule
        })
}

proptest! {
    #[test]
    fn totals_add_up_exactly(units in units_strategy(), schedule in schedule_strategy()) {
        let charge = calculate(units, &schedule).unwrap();
        prop_assert_eq!(charge.subtotal, charge.energy_charge + charge.fixed_charge);
        prop_assert_eq!(charge.total, charge.subtotal + charge.electricity_duty + charge.gst);
        let per_slab: Decimal = charge.slab_charges.iter().map(|s| s.amount).sum();
        prop_assert_eq!(per_slab, charge.energy_charge);
    }

    #[test]
    fn no_consumption_bills_no_energy(
        units in (-50_000i64..=0).prop_map(|c| Decimal::new(c, 2)),
        schedule in schedule_strategy(),
    ) {
        let charge = calculate(units, &schedule).unwrap();
        prop_assert_eq!(charge.energy_charge, Decimal::ZERO);
        prop_assert!(charge.slab_charges.is_empty());
        prop_assert_eq!(charge.subtotal, schedule.fixed_charge);
    }

    #[test]
    fn billed_units_never_exceed_consumption(
        units in units_strategy(),
        schedule in schedule_strategy(),
    ) {
        let charge = calculate(units, &schedule).unwrap();
        let billed: Decimal = charge.slab_charges.iter().map(|s| s.units).sum();
        prop_assert!(billed <= units.max(Decimal::ZERO));
        prop_assert!(charge.slab_charges.iter().all(|s| s.units > Decimal::ZERO));
    }

    #[test]
    fn more_consumption_never_costs_less(
        units in cents(5_000),
        extra in cents(500),
        schedule in schedule_strategy(),
    ) {
        let base = calculate(units, &schedule).unwrap();
        let more = calculate(units + extra, &schedule).unwrap();
        prop_assert!(more.energy_charge >= base.energy_charge);
        prop_assert!(more.total >= base.total);
    }

    #[test]
    fn identical_inputs_price_identically(
        units in units_strategy(),
        schedule in schedule_strategy(),
    ) {
        prop_assert_eq!(calculate(units, &schedule), calculate(units, &schedule));
    }

    #[test]
    fn open_ended_last_slab_bills_every_remaining_unit(
        units in cents(10_000),
        rate in 1u32..2_000,
    ) {
        let rate = Decimal::new(rate.into(), 2);
        let schedule = TariffSchedule::new(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
            .with_slab(Decimal::ZERO, None, rate);
        let charge = calculate(units, &schedule).unwrap();
        prop_assert_eq!(charge.energy_charge, units * rate);
    }
}
