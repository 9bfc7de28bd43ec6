//! Consumption bills priced by the slab tariff.
use crate::config::AppConfig;
use crate::error::{DeskError, TariffError};
use crate::identifiers::{EntropySource, OsEntropy, generate_bill_number};
use crate::model::{Bill, BillKind, BillStatus, PaymentStatus};
use crate::store::Store;
use crate::tariff::{ChargeBreakdown, TariffSchedule, calculate};
use crate::types::{Amount, TimeStamp};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

pub struct BillingService {
    store: Store,
    entropy: Arc<dyn EntropySource>,
    config: AppConfig,
}

impl BillingService {
    pub fn new(store: Store, config: AppConfig) -> Self {
        Self {
            store,
            entropy: Arc::new(OsEntropy),
            config,
        }
    }
    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    /// Price consumption without writing anything.
    pub fn quote(
        &self,
        units_consumed: Decimal,
        schedule: &TariffSchedule,
    ) -> Result<ChargeBreakdown, DeskError> {
        Ok(calculate(units_consumed, schedule)?)
    }

    /// Bill a customer for `units_consumed`.
    ///
    /// The bill, the balance increment and `last_bill_amount` commit together.
    /// Negative consumption and malformed schedules fail before any write.
    pub fn issue_consumption_bill(
        &self,
        customer_id: u64,
        units_consumed: Decimal,
        schedule: &TariffSchedule,
    ) -> Result<Bill, DeskError> {
        if units_consumed.is_sign_negative() && !units_consumed.is_zero() {
            return Err(TariffError::NegativeUnits(units_consumed.to_string()).into());
        }
        let breakdown = calculate(units_consumed, schedule)?;
        let charges = breakdown.to_bill_charges();

        let now = TimeStamp::new();
        let due_days = self.config.billing.consumption_due_days;
        let due_date = now.plus_days(due_days).ok_or_else(|| {
            DeskError::InvalidPayload(format!("a due date {due_days} days out cannot be stored"))
        })?;
        let mut entropy = self.entropy.open()?;
        let bill = Bill {
            id: self.store.next_id()?,
            customer_id,
            bill_number: generate_bill_number(
                &self.config.identifiers.bill_prefix,
                now.to_datetime_utc(),
                &mut entropy,
            ),
            kind: BillKind::Consumption,
            billing_month: now.month_start(),
            issue_date: now,
            due_date,
            units_consumed: Amount(units_consumed),
            charges,
            status: BillStatus::Issued,
        };

        let total = bill.charges.total_amount;
        self.store.transaction(|uow| {
            let customer = uow.customer(customer_id)?;
            uow.create_bill(&bill)?;
            let mut customer = uow.increment_outstanding_balance(customer.id, total)?;
            customer.last_bill_amount = total;
            if customer.outstanding_balance.is_positive() {
                customer.payment_status = PaymentStatus::Pending;
            }
            uow.update_customer(&customer)
        })?;

        info!(
            customer_id,
            bill_number = %bill.bill_number,
            total = %total,
            "consumption bill issued"
        );
        Ok(bill)
    }

    pub fn bills_for_customer(&self, customer_id: u64) -> Result<Vec<Bill>, DeskError> {
        Ok(self.store.bills_for_customer(customer_id)?)
    }
}
