//! sled-backed persistence gateway
//!
//! All records share one tree, keyed by `<kind>/<zero padded id>`. Secondary
//! lookups live under `idx/..` keys and per-city meter counters under
//! `seq/meter/<CODE>`. Multi-record writes go through [`Store::transaction`],
//! which runs a closure against a [`UnitOfWork`] inside a single sled
//! transaction: either every write lands or none does.
use crate::error::{DeskError, StoreError, TxResult, abort};
use crate::identifiers::{city_code, format_meter_number};
use crate::model::{
    Bill, ConnectionRequest, Customer, Employee, Notification, TransitionRecord, UserAccount,
    WorkOrder,
};
use crate::types::Amount;
use minicbor::{Decode, Encode};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const REQUEST: &str = "request";
const WORK_ORDER: &str = "work_order";
const CUSTOMER: &str = "customer";
const BILL: &str = "bill";
const USER: &str = "user";
const EMPLOYEE: &str = "employee";
const NOTIFICATION: &str = "notification";

pub(crate) const IDX_APPLICATION: &str = "application";
pub(crate) const IDX_ACCOUNT: &str = "account";
pub(crate) const IDX_METER: &str = "meter";
pub(crate) const IDX_USER_EMAIL: &str = "user_email";
pub(crate) const IDX_BILL_NUMBER: &str = "bill_number";
pub(crate) const IDX_REQUEST_ACCOUNT: &str = "request_account";
const IDX_ACTIVE_EMAIL: &str = "active_email";
const IDX_ACTIVE_PHONE: &str = "active_phone";

fn record_key(kind: &str, id: u64) -> String {
    format!("{kind}/{id:020}")
}

fn index_key(index: &str, value: &str) -> String {
    format!("idx/{index}/{}", value.to_ascii_lowercase())
}

fn child_prefix(relation: &str, parent: u64) -> String {
    format!("rel/{relation}/{parent:020}/")
}

fn child_key(relation: &str, parent: u64, child: u64) -> String {
    format!("{}{child:020}", child_prefix(relation, parent))
}

fn work_order_list_key(request_id: u64) -> String {
    format!("list/{WORK_ORDER}/{request_id:020}")
}

fn history_prefix(request_id: u64) -> String {
    format!("history/{request_id:020}/")
}

fn meter_sequence_key(code: &str) -> String {
    format!("seq/meter/{code}")
}

fn encode<T: Encode<()>>(key: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(value).map_err(|_| StoreError::Encode(key.to_string()))
}

fn decode<T: for<'b> Decode<'b, ()>>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    minicbor::decode(bytes).map_err(|_| StoreError::Decode(key.to_string()))
}

fn decode_id(bytes: &[u8]) -> Option<u64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}

#[derive(Clone)]
pub struct Store {
    instance: Arc<sled::Db>,
}

impl Store {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self::new(Arc::new(db)))
    }

    /// Monotonic id for a new record. Gaps are possible.
    pub fn next_id(&self) -> Result<u64, StoreError> {
        // sled ids start at zero; zero is kept free as "no record"
        Ok(self.instance.generate_id()? + 1)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.instance.flush()?;
        Ok(())
    }

    fn get<T: for<'b> Decode<'b, ()>>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.instance.get(key.as_bytes())? {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn scan<T: for<'b> Decode<'b, ()>>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        self.instance
            .scan_prefix(prefix.as_bytes())
            .map(|entry| {
                let (key, value) = entry?;
                decode(&String::from_utf8_lossy(&key), &value)
            })
            .collect()
    }

    fn lookup(&self, index: &str, value: &str) -> Result<Option<u64>, StoreError> {
        let key = index_key(index, value);
        Ok(self
            .instance
            .get(key.as_bytes())?
            .and_then(|bytes| decode_id(&bytes)))
    }

    pub fn request(&self, id: u64) -> Result<Option<ConnectionRequest>, StoreError> {
        self.get(&record_key(REQUEST, id))
    }

    pub fn request_by_application_number(
        &self,
        application_number: &str,
    ) -> Result<Option<ConnectionRequest>, StoreError> {
        match self.lookup(IDX_APPLICATION, application_number)? {
            Some(id) => self.request(id),
            None => Ok(None),
        }
    }

    pub fn work_order(&self, id: u64) -> Result<Option<WorkOrder>, StoreError> {
        self.get(&record_key(WORK_ORDER, id))
    }

    /// Work orders linked to a request through their `connection_request_id`.
    pub fn work_orders_for_request(&self, request_id: u64) -> Result<Vec<WorkOrder>, StoreError> {
        let ids: Vec<u64> = self.get(&work_order_list_key(request_id))?.unwrap_or_default();
        let mut orders = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(order) = self.work_order(id)? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    pub fn customer(&self, id: u64) -> Result<Option<Customer>, StoreError> {
        self.get(&record_key(CUSTOMER, id))
    }

    pub fn customer_by_meter_number(&self, meter: &str) -> Result<Option<Customer>, StoreError> {
        match self.lookup(IDX_METER, meter)? {
            Some(id) => self.customer(id),
            None => Ok(None),
        }
    }

    pub fn bill(&self, id: u64) -> Result<Option<Bill>, StoreError> {
        self.get(&record_key(BILL, id))
    }

    pub fn bills_for_customer(&self, customer_id: u64) -> Result<Vec<Bill>, StoreError> {
        let mut bills = Vec::new();
        for entry in self
            .instance
            .scan_prefix(child_prefix(BILL, customer_id).as_bytes())
        {
            let (_, value) = entry?;
            if let Some(bill) = decode_id(&value)
                .map(|id| self.bill(id))
                .transpose()?
                .flatten()
            {
                bills.push(bill);
            }
        }
        Ok(bills)
    }

    pub fn user(&self, id: u64) -> Result<Option<UserAccount>, StoreError> {
        self.get(&record_key(USER, id))
    }

    pub fn user_by_email(&self, email: &str) -> Result<Option<UserAccount>, StoreError> {
        match self.lookup(IDX_USER_EMAIL, email)? {
            Some(id) => self.user(id),
            None => Ok(None),
        }
    }

    pub fn employee(&self, id: u64) -> Result<Option<Employee>, StoreError> {
        self.get(&record_key(EMPLOYEE, id))
    }

    pub fn notifications_for(&self, user_id: u64) -> Result<Vec<Notification>, StoreError> {
        let mut notes = Vec::new();
        for entry in self
            .instance
            .scan_prefix(child_prefix(NOTIFICATION, user_id).as_bytes())
        {
            let (_, value) = entry?;
            if let Some(note) = decode_id(&value)
                .map(|id| self.get::<Notification>(&record_key(NOTIFICATION, id)))
                .transpose()?
                .flatten()
            {
                notes.push(note);
            }
        }
        Ok(notes)
    }

    /// Audit trail of a request, oldest first.
    pub fn history(&self, request_id: u64) -> Result<Vec<TransitionRecord>, StoreError> {
        self.scan(&history_prefix(request_id))
    }

    /// Current value of a city's meter counter.
    pub fn meter_sequence(&self, city: &str) -> Result<u64, StoreError> {
        Ok(self
            .instance
            .get(meter_sequence_key(city_code(city)).as_bytes())?
            .and_then(|bytes| decode_id(&bytes))
            .unwrap_or(0))
    }

    /// Run `f` as one atomic unit of work.
    ///
    /// sled re-runs the closure when another transaction touched the same
    /// keys, so `f` must not perform side effects outside the unit of work.
    pub fn transaction<A, F>(&self, f: F) -> Result<A, DeskError>
    where
        F: Fn(&UnitOfWork<'_>) -> TxResult<A>,
    {
        let result = self
            .instance
            .transaction(|tx| f(&UnitOfWork { tx }))
            .map_err(DeskError::from);
        if let Err(err) = &result {
            debug!(error = %err, "unit of work rolled back");
        }
        result
    }
}

fn tx_decode<T: for<'b> Decode<'b, ()>>(key: &str, bytes: &[u8]) -> TxResult<T> {
    decode(key, bytes).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn tx_encode<T: Encode<()>>(key: &str, value: &T) -> TxResult<Vec<u8>> {
    encode(key, value).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

/// Typed view over an in-flight sled transaction.
pub struct UnitOfWork<'a> {
    tx: &'a TransactionalTree,
}

impl UnitOfWork<'_> {
    fn get<T: for<'b> Decode<'b, ()>>(&self, key: &str) -> TxResult<Option<T>> {
        match self.tx.get(key.as_bytes())? {
            Some(bytes) => tx_decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put<T: Encode<()>>(&self, key: &str, value: &T) -> TxResult<()> {
        let bytes = tx_encode(key, value)?;
        self.tx.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    fn link(&self, relation: &str, parent: u64, child: u64) -> TxResult<()> {
        self.tx.insert(
            child_key(relation, parent, child).as_bytes(),
            &child.to_be_bytes()[..],
        )?;
        Ok(())
    }

    pub fn is_claimed(&self, index: &str, value: &str) -> TxResult<bool> {
        Ok(self.tx.get(index_key(index, value).as_bytes())?.is_some())
    }

    /// Reserve `value` in a uniqueness index. Aborts with
    /// [`DeskError::IdentifierCollision`] when it is already taken.
    pub fn claim(&self, index: &str, value: &str, owner: u64) -> TxResult<()> {
        if self.is_claimed(index, value)? {
            return abort(DeskError::IdentifierCollision(format!(
                "{index} {value} is already assigned"
            )));
        }
        self.tx.insert(
            index_key(index, value).as_bytes(),
            &owner.to_be_bytes()[..],
        )?;
        Ok(())
    }

    /// Mark the applicant's email and phone as holding an active application.
    pub fn claim_applicant(&self, request: &ConnectionRequest) -> TxResult<()> {
        for (index, value) in [
            (IDX_ACTIVE_EMAIL, &request.email),
            (IDX_ACTIVE_PHONE, &request.phone),
        ] {
            if self.is_claimed(index, value)? {
                return abort(DeskError::DuplicateApplication(format!(
                    "{value} already has an application in progress"
                )));
            }
            self.claim(index, value, request.id)?;
        }
        Ok(())
    }

    /// Free the applicant for a new application once this one is settled.
    pub fn release_applicant(&self, request: &ConnectionRequest) -> TxResult<()> {
        for (index, value) in [
            (IDX_ACTIVE_EMAIL, &request.email),
            (IDX_ACTIVE_PHONE, &request.phone),
        ] {
            let key = index_key(index, value);
            // only release a claim this request holds
            if self
                .tx
                .get(key.as_bytes())?
                .and_then(|bytes| decode_id(&bytes))
                == Some(request.id)
            {
                self.tx.remove(key.as_bytes())?;
            }
        }
        Ok(())
    }

    pub fn request(&self, id: u64) -> TxResult<ConnectionRequest> {
        match self.get(&record_key(REQUEST, id))? {
            Some(request) => Ok(request),
            None => abort(DeskError::RequestNotFound(id)),
        }
    }

    pub fn insert_request(&self, request: &ConnectionRequest) -> TxResult<()> {
        self.claim(IDX_APPLICATION, &request.application_number, request.id)?;
        self.put(&record_key(REQUEST, request.id), request)
    }

    pub fn update_request(&self, request: &ConnectionRequest) -> TxResult<()> {
        self.put(&record_key(REQUEST, request.id), request)
    }

    pub fn work_order(&self, id: u64) -> TxResult<WorkOrder> {
        match self.get(&record_key(WORK_ORDER, id))? {
            Some(order) => Ok(order),
            None => abort(DeskError::WorkOrderNotFound(id)),
        }
    }

    pub fn work_orders_for_request(&self, request_id: u64) -> TxResult<Vec<WorkOrder>> {
        let ids: Vec<u64> = self.get(&work_order_list_key(request_id))?.unwrap_or_default();
        ids.into_iter().map(|id| self.work_order(id)).collect()
    }

    pub fn create_work_order(&self, order: &WorkOrder) -> TxResult<()> {
        let list_key = work_order_list_key(order.connection_request_id);
        let mut ids: Vec<u64> = self.get(&list_key)?.unwrap_or_default();
        ids.push(order.id);
        self.put(&list_key, &ids)?;
        self.put(&record_key(WORK_ORDER, order.id), order)
    }

    pub fn update_work_order(&self, order: &WorkOrder) -> TxResult<()> {
        self.put(&record_key(WORK_ORDER, order.id), order)
    }

    pub fn customer(&self, id: u64) -> TxResult<Customer> {
        match self.get(&record_key(CUSTOMER, id))? {
            Some(customer) => Ok(customer),
            None => abort(DeskError::CustomerNotFound(id)),
        }
    }

    pub fn create_customer(&self, customer: &Customer) -> TxResult<()> {
        self.claim(IDX_ACCOUNT, &customer.account_number, customer.id)?;
        self.claim(IDX_METER, &customer.meter_number, customer.id)?;
        self.put(&record_key(CUSTOMER, customer.id), customer)
    }

    pub fn update_customer(&self, customer: &Customer) -> TxResult<()> {
        self.put(&record_key(CUSTOMER, customer.id), customer)
    }

    /// Add `amount` to a customer's outstanding balance.
    pub fn increment_outstanding_balance(&self, customer_id: u64, amount: Amount) -> TxResult<Customer> {
        if amount.is_negative() {
            return abort(DeskError::InvalidPayload(
                "balance increments must not be negative".into(),
            ));
        }
        let mut customer = self.customer(customer_id)?;
        customer.outstanding_balance = match customer.outstanding_balance.checked_add(amount) {
            Some(balance) => balance,
            None => {
                return abort(DeskError::PersistenceFailure(
                    "outstanding balance overflow".into(),
                ));
            }
        };
        self.update_customer(&customer)?;
        Ok(customer)
    }

    pub fn create_bill(&self, bill: &Bill) -> TxResult<()> {
        self.claim(IDX_BILL_NUMBER, &bill.bill_number, bill.id)?;
        self.link(BILL, bill.customer_id, bill.id)?;
        self.put(&record_key(BILL, bill.id), bill)
    }

    pub fn create_user(&self, user: &UserAccount) -> TxResult<()> {
        if self.is_claimed(IDX_USER_EMAIL, &user.email)? {
            return abort(DeskError::PreconditionFailed(format!(
                "a user account already exists for {}",
                user.email
            )));
        }
        self.claim(IDX_USER_EMAIL, &user.email, user.id)?;
        self.put(&record_key(USER, user.id), user)
    }

    pub fn create_employee(&self, employee: &Employee) -> TxResult<()> {
        self.put(&record_key(EMPLOYEE, employee.id), employee)
    }

    pub fn create_notification(&self, notification: &Notification) -> TxResult<()> {
        self.link(NOTIFICATION, notification.user_id, notification.id)?;
        self.put(&record_key(NOTIFICATION, notification.id), notification)
    }

    pub fn append_history(&self, record: &TransitionRecord) -> TxResult<()> {
        let key = format!("{}{}", history_prefix(record.request_id), record.transition_id);
        self.put(&key, record)
    }

    /// Next meter number for `city`.
    ///
    /// The counter lives in the transaction, so two concurrent allocations for
    /// the same city conflict and one of them is re-run with the bumped value.
    /// A number that is already taken (imported meters) is skipped, at most
    /// `attempts` times.
    pub fn allocate_meter_number(&self, prefix: &str, city: &str, attempts: u32) -> TxResult<String> {
        let code = city_code(city);
        let key = meter_sequence_key(code);
        let mut sequence = self
            .tx
            .get(key.as_bytes())?
            .and_then(|bytes| decode_id(&bytes))
            .unwrap_or(0);

        for _ in 0..attempts {
            sequence += 1;
            let candidate = match format_meter_number(prefix, code, sequence) {
                Ok(number) => number,
                Err(err) => return abort(err),
            };
            if !self.is_claimed(IDX_METER, &candidate)? {
                self.tx.insert(key.as_bytes(), &sequence.to_be_bytes()[..])?;
                return Ok(candidate);
            }
            debug!(meter = %candidate, "meter number already taken, advancing");
        }

        abort(DeskError::IdentifierCollision(format!(
            "no free meter number for {code} after {attempts} attempts"
        )))
    }
}
