//! Service layer API for the connection request workflow
use crate::config::AppConfig;
use crate::directory::{Directory, Notifier};
use crate::error::{DeskError, TxResult, abort};
use crate::identifiers::{
    EntropySource, OsEntropy, TemporaryCredential, generate_account_number,
    generate_application_number, generate_bill_number, generate_temporary_credential,
};
use crate::lifecycle::{self, Action, ActionKind, ApprovePayload, Effect, Guard, Mode};
use crate::model::{
    Bill, BillCharges, BillKind, BillStatus, ConnectionRequest, ConnectionType, Customer,
    CustomerStatus, Employee, EmployeeStatus, IssuedCredential, Notice, NoticePriority,
    PaymentStatus, Priority, PropertyType, RequestStatus, TransitionRecord, UserAccount,
    UserType, WorkOrder, WorkOrderStatus, WorkType,
};
use crate::store::{IDX_ACCOUNT, IDX_REQUEST_ACCOUNT, Store, UnitOfWork};
use crate::types::{Amount, TimeStamp};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

const APPLICATION_NUMBER_ATTEMPTS: u32 = 5;

/// Applicant details for a new connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConnectionRequest {
    pub applicant_name: String,
    pub email: String,
    pub phone: String,
    pub property_address: String,
    pub city: String,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub property_type: PropertyType,
    pub connection_type: ConnectionType,
    pub load_required_kw: Option<Amount>,
    pub preferred_date: Option<TimeStamp<Utc>>,
}

impl NewConnectionRequest {
    pub fn new(applicant_name: &str, email: &str, phone: &str, address: &str, city: &str) -> Self {
        Self {
            applicant_name: applicant_name.trim().to_string(),
            email: email.trim().to_string(),
            phone: phone.trim().to_string(),
            property_address: address.trim().to_string(),
            city: city.trim().to_string(),
            state: None,
            pincode: None,
            property_type: PropertyType::Residential,
            connection_type: ConnectionType::SinglePhase,
            load_required_kw: None,
            preferred_date: None,
        }
    }
    pub fn set_state(mut self, state: &str) -> Self {
        self.state = Some(state.to_string());
        self
    }
    pub fn set_pincode(mut self, pincode: &str) -> Self {
        self.pincode = Some(pincode.to_string());
        self
    }
    pub fn set_property_type(mut self, property_type: PropertyType) -> Self {
        self.property_type = property_type;
        self
    }
    pub fn set_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }
    pub fn set_load_required_kw(mut self, load: Amount) -> Self {
        self.load_required_kw = Some(load);
        self
    }
    pub fn set_preferred_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.preferred_date = Some(date);
        self
    }

    pub fn validate(&self) -> Result<(), DeskError> {
        for (field, value) in [
            ("applicant_name", &self.applicant_name),
            ("phone", &self.phone),
            ("property_address", &self.property_address),
            ("city", &self.city),
        ] {
            if value.is_empty() {
                return Err(DeskError::InvalidPayload(format!("{field} is required")));
            }
        }
        let valid_email = self
            .email
            .split_once('@')
            .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
        if !valid_email {
            return Err(DeskError::InvalidPayload(format!(
                "{} is not an email address",
                self.email
            )));
        }
        if self.preferred_date.is_some_and(|date| !date.is_storable()) {
            return Err(DeskError::InvalidPayload("preferred_date is out of range".into()));
        }
        if self.load_required_kw.is_some_and(|kw| kw.is_negative()) {
            return Err(DeskError::InvalidPayload(
                "load_required_kw must not be negative".into(),
            ));
        }
        Ok(())
    }

    fn into_request(
        self,
        id: u64,
        application_number: String,
        now: TimeStamp<Utc>,
    ) -> ConnectionRequest {
        ConnectionRequest {
            id,
            application_number,
            applicant_name: self.applicant_name,
            email: self.email,
            phone: self.phone,
            property_address: self.property_address,
            city: self.city,
            state: self.state,
            pincode: self.pincode,
            property_type: self.property_type,
            connection_type: self.connection_type,
            load_required_kw: self.load_required_kw,
            preferred_date: self.preferred_date,
            status: RequestStatus::Pending,
            estimated_charges: None,
            inspection_date: None,
            applied_at: now,
            approved_at: None,
            inspected_at: None,
            installed_at: None,
            account_number: None,
            credential: None,
            rejection_notes: None,
            customer_id: None,
        }
    }
}

/// Identifiers a transition produced, returned to the caller once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedFields {
    Approval {
        account_number: String,
        /// `None` on a replayed approval; the password is only ever shown once.
        temporary_password: Option<TemporaryCredential>,
    },
    Customer {
        customer_id: u64,
        account_number: String,
        meter_number: String,
        /// Only set when the request had no credential yet.
        temporary_password: Option<TemporaryCredential>,
        email: String,
        name: String,
        bill_id: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub request_id: u64,
    pub action: ActionKind,
    pub previous_status: RequestStatus,
    pub new_status: RequestStatus,
    pub generated: Option<GeneratedFields>,
    pub work_order_id: Option<u64>,
    /// The action had already been applied; nothing was written.
    pub replayed: bool,
}

enum Recipient {
    User(u64),
    /// Resolved through the directory after the commit; skipped if unknown.
    Email(String),
}

struct Committed {
    outcome: TransitionOutcome,
    notices: Vec<(Recipient, Notice)>,
}

/// Everything that must not be produced inside the sled closure, which may run
/// more than once: ids, random identifiers, hashes and directory lookups.
struct Prepared {
    now: TimeStamp<Utc>,
    transition_id: String,
    account_number: Option<String>,
    credential: Option<(TemporaryCredential, String)>,
    assignee: Option<Employee>,
    work_order_id: Option<u64>,
    work_order_due: Option<TimeStamp<Utc>>,
    user_id: Option<u64>,
    customer_id: Option<u64>,
    bill: Option<PreparedBill>,
}

struct PreparedBill {
    id: u64,
    number: String,
    due_date: TimeStamp<Utc>,
}

fn due_in(now: TimeStamp<Utc>, days: i64) -> Result<TimeStamp<Utc>, DeskError> {
    now.plus_days(days).ok_or_else(|| {
        DeskError::InvalidPayload(format!("a due date {days} days out cannot be stored"))
    })
}

fn stale() -> DeskError {
    DeskError::PreconditionFailed("request changed while the transition was prepared".into())
}

pub struct ConnectionService {
    store: Store,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    entropy: Arc<dyn EntropySource>,
    config: AppConfig,
}

impl ConnectionService {
    pub fn new(store: Store, config: AppConfig) -> Self {
        Self {
            directory: Arc::new(store.clone()),
            notifier: Arc::new(store.clone()),
            entropy: Arc::new(OsEntropy),
            store,
            config,
        }
    }
    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = directory;
        self
    }
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn request(&self, request_id: u64) -> Result<ConnectionRequest, DeskError> {
        self.store
            .request(request_id)?
            .ok_or(DeskError::RequestNotFound(request_id))
    }

    pub fn history(&self, request_id: u64) -> Result<Vec<TransitionRecord>, DeskError> {
        Ok(self.store.history(request_id)?)
    }

    /// Record a new application in `pending`.
    ///
    /// An applicant (by email or phone) may hold one active application at a
    /// time. Application numbers are random; a collision is retried with a
    /// fresh number a bounded number of times.
    pub fn submit_request(
        &self,
        application: NewConnectionRequest,
    ) -> Result<ConnectionRequest, DeskError> {
        application.validate()?;
        let mut entropy = self.entropy.open()?;
        let now = TimeStamp::new();
        let id = self.store.next_id()?;
        let prefix = &self.config.identifiers.application_prefix;

        for _ in 0..APPLICATION_NUMBER_ATTEMPTS {
            let number = generate_application_number(prefix, now.to_datetime_utc(), &mut entropy);
            let request = application.clone().into_request(id, number, now);

            let result = self.store.transaction(|uow| {
                uow.claim_applicant(&request)?;
                uow.insert_request(&request)
            });
            match result {
                Ok(()) => {
                    info!(
                        request_id = id,
                        application_number = %request.application_number,
                        "connection request submitted"
                    );
                    return Ok(request);
                }
                Err(DeskError::IdentifierCollision(reason)) => {
                    debug!(%reason, "application number taken, drawing another");
                }
                Err(err) => return Err(err),
            }
        }

        Err(DeskError::IdentifierCollision(format!(
            "no free application number after {APPLICATION_NUMBER_ATTEMPTS} attempts"
        )))
    }

    /// Apply `action` to a request.
    ///
    /// All writes of the transition commit together or not at all. Notifications
    /// are sent after the commit; their failures are logged and dropped.
    pub fn apply_transition(
        &self,
        request_id: u64,
        action: Action,
    ) -> Result<TransitionOutcome, DeskError> {
        let kind = action.kind();
        let result = self.try_apply(request_id, &action);
        match &result {
            Ok(outcome) => info!(
                request_id,
                action = %kind,
                from = %outcome.previous_status,
                to = %outcome.new_status,
                replayed = outcome.replayed,
                "transition applied"
            ),
            Err(err) => warn!(
                request_id,
                action = %kind,
                kind = err.kind().as_str(),
                error = %err,
                "transition refused"
            ),
        }
        result
    }

    fn try_apply(&self, request_id: u64, action: &Action) -> Result<TransitionOutcome, DeskError> {
        action.validate()?;
        let current = self.request(request_id)?;
        // fail fast; the plan is taken again inside the unit of work
        let transition = lifecycle::plan(current.status, action.kind())?;
        let prepared = self.prepare(&current, transition, action)?;

        let committed = self
            .store
            .transaction(|uow| self.execute(uow, request_id, action, &prepared))?;

        self.deliver(committed.notices);
        Ok(committed.outcome)
    }

    fn prepare(
        &self,
        current: &ConnectionRequest,
        transition: &lifecycle::Transition,
        action: &Action,
    ) -> Result<Prepared, DeskError> {
        let now = TimeStamp::new();
        let mut prepared = Prepared {
            now,
            transition_id: uuid7::uuid7().to_string(),
            account_number: None,
            credential: None,
            assignee: None,
            work_order_id: None,
            work_order_due: None,
            user_id: None,
            customer_id: None,
            bill: None,
        };
        if transition.mode == Mode::Replay {
            return Ok(prepared);
        }

        let ids = &self.config.identifiers;
        let billing = &self.config.billing;
        let needs_secrets = (transition.performs(Effect::IssueCredentials)
            || transition.performs(Effect::CreateUserAccount))
            && (current.account_number.is_none() || current.credential.is_none());
        let needs_bill = transition.performs(Effect::IssueConnectionBill)
            && current.estimated_charges.is_some_and(|fee| fee.is_positive());

        if needs_secrets || needs_bill {
            // fail closed: no identifiers without a secure seed
            let mut entropy = self.entropy.open()?;
            if needs_secrets {
                prepared.account_number = Some(generate_account_number(
                    &ids.account_prefix,
                    now.to_datetime_utc(),
                    &mut entropy,
                ));
                let credential = generate_temporary_credential(ids.credential_length, &mut entropy)?;
                let hash = credential.hash(&mut entropy)?;
                prepared.credential = Some((credential, hash));
            }
            if needs_bill {
                prepared.bill = Some(PreparedBill {
                    id: self.store.next_id()?,
                    number: generate_bill_number(&ids.bill_prefix, now.to_datetime_utc(), &mut entropy),
                    due_date: due_in(now, billing.connection_fee_due_days)?,
                });
            }
        }

        if let Action::Approve(ApprovePayload {
            employee_id: Some(employee_id),
            ..
        }) = action
        {
            let employee = self
                .directory
                .find_employee_by_id(*employee_id)?
                .ok_or_else(|| {
                    DeskError::PreconditionFailed(format!("employee {employee_id} not found"))
                })?;
            if employee.status != EmployeeStatus::Active {
                return Err(DeskError::PreconditionFailed(format!(
                    "employee {employee_id} is not active"
                )));
            }
            prepared.work_order_due = Some(match current.preferred_date {
                Some(date) => date,
                None => due_in(now, billing.work_order_due_days)?,
            });
            prepared.assignee = Some(employee);
            prepared.work_order_id = Some(self.store.next_id()?);
        }

        if transition.performs(Effect::CreateUserAccount) {
            prepared.user_id = Some(self.store.next_id()?);
        }
        if transition.performs(Effect::CreateCustomer) {
            prepared.customer_id = Some(self.store.next_id()?);
        }
        Ok(prepared)
    }

    fn execute(
        &self,
        uow: &UnitOfWork<'_>,
        request_id: u64,
        action: &Action,
        prepared: &Prepared,
    ) -> TxResult<Committed> {
        let mut request = uow.request(request_id)?;
        let from = request.status;
        let transition = match lifecycle::plan(from, action.kind()) {
            Ok(transition) => transition,
            Err(err) => return abort(err),
        };
        let mut outcome = TransitionOutcome {
            request_id,
            action: action.kind(),
            previous_status: from,
            new_status: transition.to,
            generated: None,
            work_order_id: None,
            replayed: false,
        };

        if transition.mode == Mode::Replay {
            outcome.replayed = true;
            outcome.generated = request
                .account_number
                .clone()
                .map(|account_number| GeneratedFields::Approval {
                    account_number,
                    temporary_password: None,
                });
            return Ok(Committed {
                outcome,
                notices: Vec::new(),
            });
        }

        let started_order = match transition.guard {
            Guard::None => None,
            Guard::StartedWorkOrder => {
                let orders = uow.work_orders_for_request(request_id)?;
                match orders.into_iter().find(|order| order.status.is_started()) {
                    Some(order) => Some(order),
                    None => {
                        return abort(DeskError::PreconditionFailed(format!(
                            "{} has no work order in progress or completed",
                            request.application_number
                        )));
                    }
                }
            }
        };

        let now = prepared.now;
        let mut password = None;
        let mut user_id = None;
        let mut customer: Option<Customer> = None;
        let mut bill_id = None;

        for effect in transition.effects.iter().filter(|e| !e.is_post_commit()) {
            match effect {
                Effect::IssueCredentials => {
                    password = issue_missing_credentials(uow, &mut request, prepared)?;
                }
                Effect::RecordApproval => {
                    request.approved_at = Some(now);
                    if let Action::Approve(payload) = action {
                        request.estimated_charges =
                            payload.estimated_charges.or(request.estimated_charges);
                        request.inspection_date =
                            payload.inspection_date.or(request.inspection_date);
                    }
                }
                Effect::CreateWorkOrder => {
                    let Some(assignee) = &prepared.assignee else {
                        continue;
                    };
                    let (Some(id), Some(due_date)) = (prepared.work_order_id, prepared.work_order_due)
                    else {
                        return abort(stale());
                    };
                    let order = WorkOrder {
                        id,
                        connection_request_id: request.id,
                        employee_id: Some(assignee.id),
                        customer_id: None,
                        work_type: WorkType::NewConnection,
                        title: format!("New Connection Installation - {}", request.application_number),
                        description: format!(
                            "Install new {} connection for {}",
                            request.connection_type.as_str(),
                            request.applicant_name
                        ),
                        status: WorkOrderStatus::Assigned,
                        priority: Priority::High,
                        assigned_date: now,
                        due_date,
                        completion_date: None,
                        completion_notes: None,
                    };
                    uow.create_work_order(&order)?;
                    outcome.work_order_id = Some(id);
                }
                Effect::RecordRejection => {
                    let notes = match action {
                        Action::Reject(payload) => payload.notes.clone(),
                        _ => None,
                    };
                    request.rejection_notes =
                        Some(notes.unwrap_or_else(|| "Request rejected by admin".into()));
                }
                Effect::RecordInspection => {
                    if let Action::ScheduleInspection(payload) = action {
                        request.inspection_date = Some(payload.inspection_date);
                        request.estimated_charges = Some(payload.estimated_charges);
                    }
                    request.inspected_at = Some(now);
                }
                Effect::CreateUserAccount => {
                    // approvals recorded before credentials existed get them now
                    password = issue_missing_credentials(uow, &mut request, prepared)?;
                    let (Some(id), Some(credential)) = (prepared.user_id, &request.credential)
                    else {
                        return abort(stale());
                    };
                    uow.create_user(&UserAccount {
                        id,
                        email: request.email.clone(),
                        password_hash: credential.password_hash.clone(),
                        user_type: UserType::Customer,
                        name: request.applicant_name.clone(),
                        phone: Some(request.phone.clone()),
                        is_active: true,
                    })?;
                    user_id = Some(id);
                }
                Effect::CreateCustomer => {
                    let (Some(id), Some(user_id), Some(account_number)) =
                        (prepared.customer_id, user_id, request.account_number.clone())
                    else {
                        return abort(stale());
                    };
                    let meter_number = uow.allocate_meter_number(
                        &self.config.identifiers.meter_prefix,
                        &request.city,
                        self.config.identifiers.meter_allocation_attempts,
                    )?;
                    let zone = match action {
                        Action::CreateCustomer(payload) => payload.zone.clone(),
                        _ => None,
                    };
                    let record = Customer {
                        id,
                        user_id,
                        connection_request_id: Some(request.id),
                        account_number,
                        meter_number,
                        full_name: request.applicant_name.clone(),
                        email: request.email.clone(),
                        phone: request.phone.clone(),
                        address: request.property_address.clone(),
                        city: request.city.clone(),
                        state: request.state.clone(),
                        pincode: request.pincode.clone(),
                        zone,
                        property_type: request.property_type,
                        status: CustomerStatus::Active,
                        connection_date: now,
                        last_bill_amount: Amount::ZERO,
                        outstanding_balance: Amount::ZERO,
                        payment_status: PaymentStatus::Paid,
                    };
                    uow.create_customer(&record)?;
                    request.customer_id = Some(id);
                    customer = Some(record);
                }
                Effect::IssueConnectionBill => {
                    let Some(fee) = request.estimated_charges.filter(|fee| fee.is_positive())
                    else {
                        continue;
                    };
                    let (Some(record), Some(prepared_bill)) = (customer.as_mut(), &prepared.bill)
                    else {
                        return abort(stale());
                    };
                    let fee = fee.rounded();
                    uow.create_bill(&Bill {
                        id: prepared_bill.id,
                        customer_id: record.id,
                        bill_number: prepared_bill.number.clone(),
                        kind: BillKind::ConnectionFee,
                        billing_month: now.month_start(),
                        issue_date: now,
                        due_date: prepared_bill.due_date,
                        units_consumed: Amount::ZERO,
                        charges: BillCharges {
                            base_amount: fee,
                            total_amount: fee,
                            ..BillCharges::default()
                        },
                        status: BillStatus::Issued,
                    })?;
                    let mut updated = uow.increment_outstanding_balance(record.id, fee)?;
                    updated.last_bill_amount = fee;
                    updated.payment_status = PaymentStatus::Pending;
                    uow.update_customer(&updated)?;
                    *record = updated;
                    bill_id = Some(prepared_bill.id);
                }
                Effect::CompleteWorkOrder => {
                    if let Some(mut order) = started_order.clone() {
                        order.status = WorkOrderStatus::Completed;
                        order.completion_date.get_or_insert(now);
                        order.customer_id = customer.as_ref().map(|c| c.id);
                        uow.update_work_order(&order)?;
                        outcome.work_order_id = Some(order.id);
                    }
                }
                Effect::RecordInstallation => {
                    request.installed_at.get_or_insert(now);
                }
                Effect::NotifyAssignee | Effect::NotifyApplicant => {}
            }
        }

        request.status = transition.to;
        if from.is_active() && !transition.to.is_active() {
            uow.release_applicant(&request)?;
        }
        uow.update_request(&request)?;
        uow.append_history(&TransitionRecord {
            transition_id: prepared.transition_id.clone(),
            request_id,
            action: action.kind().as_str().to_string(),
            from,
            to: transition.to,
            recorded_at: now,
        })?;

        let mut notices = Vec::new();
        for effect in transition.effects.iter().filter(|e| e.is_post_commit()) {
            match effect {
                Effect::NotifyAssignee => {
                    let (Some(assignee), Some(id)) = (&prepared.assignee, outcome.work_order_id)
                    else {
                        continue;
                    };
                    if let Some(user) = assignee.user_id {
                        notices.push((
                            Recipient::User(user),
                            Notice {
                                title: "New work order assigned".into(),
                                message: format!(
                                    "Install a new {} connection for {} at {} ({}).",
                                    request.connection_type.as_str(),
                                    request.applicant_name,
                                    request.property_address,
                                    request.application_number
                                ),
                                priority: NoticePriority::High,
                                action_url: Some(format!("/employee/work-orders/{id}")),
                            },
                        ));
                    }
                }
                Effect::NotifyApplicant => {
                    let recipient = match user_id {
                        Some(id) => Recipient::User(id),
                        None => Recipient::Email(request.email.clone()),
                    };
                    notices.push((recipient, applicant_notice(&request, transition.to)));
                }
                _ => {}
            }
        }

        outcome.generated = match action.kind() {
            ActionKind::Approve => request
                .account_number
                .clone()
                .map(|account_number| GeneratedFields::Approval {
                    account_number,
                    temporary_password: password,
                }),
            ActionKind::CreateCustomer => customer.map(|record| GeneratedFields::Customer {
                customer_id: record.id,
                account_number: record.account_number,
                meter_number: record.meter_number,
                temporary_password: password,
                email: record.email,
                name: record.full_name,
                bill_id,
            }),
            _ => None,
        };

        Ok(Committed { outcome, notices })
    }

    fn deliver(&self, notices: Vec<(Recipient, Notice)>) {
        for (recipient, notice) in notices {
            let user_id = match recipient {
                Recipient::User(id) => Some(id),
                Recipient::Email(email) => match self.directory.find_user_by_email(&email) {
                    Ok(user) => user.map(|u| u.id),
                    Err(err) => {
                        warn!(%email, error = %err, "recipient lookup failed");
                        None
                    }
                },
            };
            let Some(user_id) = user_id else {
                debug!(title = %notice.title, "no account to notify");
                continue;
            };
            if let Err(err) = self.notifier.notify(user_id, &notice) {
                warn!(user_id, title = %notice.title, error = %err, "notification dropped");
            }
        }
    }

    /// `assigned -> in_progress`.
    pub fn start_work_order(&self, work_order_id: u64) -> Result<WorkOrder, DeskError> {
        self.move_work_order(work_order_id, WorkOrderStatus::InProgress, None)
    }

    /// `in_progress -> completed`.
    pub fn complete_work_order(
        &self,
        work_order_id: u64,
        notes: Option<&str>,
    ) -> Result<WorkOrder, DeskError> {
        self.move_work_order(work_order_id, WorkOrderStatus::Completed, notes)
    }

    pub fn work_orders_for_request(&self, request_id: u64) -> Result<Vec<WorkOrder>, DeskError> {
        Ok(self.store.work_orders_for_request(request_id)?)
    }

    fn move_work_order(
        &self,
        work_order_id: u64,
        to: WorkOrderStatus,
        notes: Option<&str>,
    ) -> Result<WorkOrder, DeskError> {
        let now = TimeStamp::new();
        let order = self.store.transaction(|uow| {
            let mut order = uow.work_order(work_order_id)?;
            let allowed = matches!(
                (order.status, to),
                (WorkOrderStatus::Assigned, WorkOrderStatus::InProgress)
                    | (WorkOrderStatus::InProgress, WorkOrderStatus::Completed)
            );
            if !allowed {
                return abort(DeskError::InvalidWorkOrderMove {
                    work_order_id,
                    from: order.status.as_str(),
                    to: to.as_str(),
                });
            }
            order.status = to;
            if to == WorkOrderStatus::Completed {
                order.completion_date = Some(now);
                order.completion_notes = notes.map(str::to_string);
            }
            uow.update_work_order(&order)?;
            Ok(order)
        })?;
        info!(work_order_id, status = to.as_str(), "work order moved");
        Ok(order)
    }
}

/// Write the account number and credential onto the request unless they are
/// already there. Returns the plaintext only when a credential was issued now.
fn issue_missing_credentials(
    uow: &UnitOfWork<'_>,
    request: &mut ConnectionRequest,
    prepared: &Prepared,
) -> TxResult<Option<TemporaryCredential>> {
    if request.account_number.is_none() {
        let Some(account_number) = &prepared.account_number else {
            return abort(stale());
        };
        if uow.is_claimed(IDX_ACCOUNT, account_number)? {
            return abort(DeskError::IdentifierCollision(format!(
                "account number {account_number} is already assigned"
            )));
        }
        uow.claim(IDX_REQUEST_ACCOUNT, account_number, request.id)?;
        request.account_number = Some(account_number.clone());
    }
    if request.credential.is_some() {
        return Ok(None);
    }
    let Some((credential, password_hash)) = &prepared.credential else {
        return abort(stale());
    };
    request.credential = Some(IssuedCredential {
        password_hash: password_hash.clone(),
        issued_at: prepared.now,
    });
    Ok(Some(credential.clone()))
}

fn applicant_notice(request: &ConnectionRequest, status: RequestStatus) -> Notice {
    match status {
        RequestStatus::Connected => Notice {
            title: "Your connection is active".into(),
            message: format!(
                "Application {} is complete. Your account number is {}.",
                request.application_number,
                request.account_number.as_deref().unwrap_or_default()
            ),
            priority: NoticePriority::High,
            action_url: Some("/customer/dashboard".into()),
        },
        _ => Notice {
            title: "Connection request update".into(),
            message: format!(
                "Application {} is now {}. {}",
                request.application_number,
                status,
                request.rejection_notes.as_deref().unwrap_or_default()
            )
            .trim_end()
            .to_string(),
            priority: NoticePriority::Normal,
            action_url: None,
        },
    }
}
