//! Progressive slab tariff calculator
//!
//! Consumption is walked through the rate bands in order. Each band bills the
//! units between `max(start, consumed so far)` and `min(end, units)`; units that
//! fall in a gap between two bands are never billed, and a unit covered by two
//! overlapping bands is billed once, in the first of them. Duty and GST are
//! percentages of `energy + fixed`.
//!
//! Every figure is kept at full decimal precision. Call
//! [`ChargeBreakdown::to_bill_charges`] to round for presentation.
use crate::error::TariffError;
use crate::model::BillCharges;
use crate::types::Amount;
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Slab {
    pub start: Decimal,
    /// `None` bills every remaining unit in this slab.
    #[serde(default)]
    pub end: Option<Decimal>,
    pub rate_per_unit: Decimal,
}

impl Slab {
    pub fn new(start: Decimal, end: Option<Decimal>, rate_per_unit: Decimal) -> Self {
        Self {
            start,
            end,
            rate_per_unit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TariffSchedule {
    pub slabs: Vec<Slab>,
    #[serde(default)]
    pub fixed_charge: Decimal,
    #[serde(default)]
    pub electricity_duty_percent: Decimal,
    #[serde(default)]
    pub gst_percent: Decimal,
}

impl TariffSchedule {
    pub fn new(fixed_charge: Decimal, electricity_duty_percent: Decimal, gst_percent: Decimal) -> Self {
        Self {
            slabs: vec![],
            fixed_charge,
            electricity_duty_percent,
            gst_percent,
        }
    }
    pub fn with_slab(mut self, start: Decimal, end: Option<Decimal>, rate_per_unit: Decimal) -> Self {
        self.slabs.push(Slab::new(start, end, rate_per_unit));
        self
    }
    /// Rejects schedules the walk cannot price deterministically.
    ///
    /// Gaps and overlaps between consecutive slabs are allowed.
    pub fn validate(&self) -> Result<(), TariffError> {
        if self.fixed_charge.is_sign_negative() && !self.fixed_charge.is_zero() {
            return Err(TariffError::NegativeCharge("fixed charge"));
        }
        if self.electricity_duty_percent < Decimal::ZERO {
            return Err(TariffError::NegativeCharge("electricity duty percent"));
        }
        if self.gst_percent < Decimal::ZERO {
            return Err(TariffError::NegativeCharge("gst percent"));
        }

        let last = self.slabs.len().saturating_sub(1);
        let mut previous_start: Option<Decimal> = None;
        for (index, slab) in self.slabs.iter().enumerate() {
            if slab.start < Decimal::ZERO {
                return Err(TariffError::NegativeStart { index });
            }
            if slab.rate_per_unit < Decimal::ZERO {
                return Err(TariffError::NegativeRate { index });
            }
            match slab.end {
                Some(end) if end <= slab.start => return Err(TariffError::EmptySlab { index }),
                None if index != last => return Err(TariffError::OpenSlabNotLast { index }),
                _ => {}
            }
            if previous_start.is_some_and(|prev| slab.start < prev) {
                return Err(TariffError::SlabsOutOfOrder {
                    index,
                    start: slab.start.to_string(),
                });
            }
            previous_start = Some(slab.start);
        }

        Ok(())
    }
}

/// Units and charge attributed to one slab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlabCharge {
    pub slab_index: usize,
    pub units: Decimal,
    pub rate_per_unit: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeBreakdown {
    pub units_consumed: Decimal,
    pub slab_charges: Vec<SlabCharge>,
    pub energy_charge: Decimal,
    pub fixed_charge: Decimal,
    pub subtotal: Decimal,
    pub electricity_duty: Decimal,
    pub gst: Decimal,
    pub total: Decimal,
}

impl ChargeBreakdown {
    /// Round each line to cents. The total is the rounded exact total, not the
    /// sum of rounded lines.
    pub fn to_bill_charges(&self) -> BillCharges {
        BillCharges {
            base_amount: Amount(self.energy_charge).rounded(),
            fixed_charges: Amount(self.fixed_charge).rounded(),
            electricity_duty: Amount(self.electricity_duty).rounded(),
            gst_amount: Amount(self.gst).rounded(),
            total_amount: Amount(self.total).rounded(),
        }
    }
}

/// Price `units_consumed` against `schedule`.
///
/// Zero or negative consumption bills no energy but still carries the fixed
/// charge and its duty and GST.
pub fn calculate(
    units_consumed: Decimal,
    schedule: &TariffSchedule,
) -> Result<ChargeBreakdown, TariffError> {
    schedule.validate()?;

    let mut consumed = Decimal::ZERO;
    let mut energy_charge = Decimal::ZERO;
    let mut slab_charges = Vec::new();

    for (slab_index, slab) in schedule.slabs.iter().enumerate() {
        if consumed >= units_consumed {
            break;
        }

        let lower = slab.start.max(consumed);
        let upper = match slab.end {
            Some(end) => end.min(units_consumed),
            None => units_consumed,
        };
        let units = (upper - lower).max(Decimal::ZERO);
        if units.is_zero() {
            continue;
        }

        let amount = units
            .checked_mul(slab.rate_per_unit)
            .ok_or(TariffError::Overflow)?;
        energy_charge = energy_charge
            .checked_add(amount)
            .ok_or(TariffError::Overflow)?;
        consumed = lower + units;

        slab_charges.push(SlabCharge {
            slab_index,
            units,
            rate_per_unit: slab.rate_per_unit,
            amount,
        });
    }

    let subtotal = energy_charge
        .checked_add(schedule.fixed_charge)
        .ok_or(TariffError::Overflow)?;
    let electricity_duty = percent_of(subtotal, schedule.electricity_duty_percent)?;
    let gst = percent_of(subtotal, schedule.gst_percent)?;
    let total = subtotal
        .checked_add(electricity_duty)
        .and_then(|t| t.checked_add(gst))
        .ok_or(TariffError::Overflow)?;

    Ok(ChargeBreakdown {
        units_consumed,
        slab_charges,
        energy_charge,
        fixed_charge: schedule.fixed_charge,
        subtotal,
        electricity_duty,
        gst,
        total,
    })
}

fn percent_of(value: Decimal, percent: Decimal) -> Result<Decimal, TariffError> {
    value
        .checked_mul(percent)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .ok_or(TariffError::Overflow)
}
