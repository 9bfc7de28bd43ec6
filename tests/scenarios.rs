use anyhow::Context;
use connection_desk::{
    billing::BillingService,
    config::AppConfig,
    directory::{NewEmployee, Notifier, register_employee, register_user},
    error::{DeskError, ErrorKind, IdentifierError, NotificationError},
    identifiers::{Entropy, EntropySource, hash_password, is_valid_meter_number, verify_password},
    lifecycle::{Action, ApprovePayload, CreateCustomerPayload, InspectionPayload, RejectPayload},
    model::{
        BillKind, ConnectionRequest, ConnectionType, Customer, CustomerStatus, Employee,
        IssuedCredential, Notice, PaymentStatus, Priority, PropertyType, RequestStatus, UserType,
        WorkOrder, WorkOrderStatus, WorkType,
    },
    service::{ConnectionService, GeneratedFields, NewConnectionRequest},
    store::Store,
    tariff::TariffSchedule,
    types::{Amount, TimeStamp},
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

// Sled holds a file lock per database, so every test opens its own in a
// temporary directory.
fn open_desk(name: &str) -> anyhow::Result<(TempDir, ConnectionService)> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join(name))?;
    db.clear()?;
    let store = Store::new(Arc::new(db));
    Ok((temp_dir, ConnectionService::new(store, AppConfig::default())))
}

fn applicant(name: &str, email: &str, phone: &str, city: &str) -> NewConnectionRequest {
    NewConnectionRequest::new(name, email, phone, "House 12, Street 4", city)
        .set_property_type(PropertyType::Residential)
        .set_connection_type(ConnectionType::SinglePhase)
        .set_load_required_kw(Amount::from(5))
}

fn technician(service: &ConnectionService, email: &str) -> anyhow::Result<Employee> {
    let mut entropy = Entropy::from_seed([7; 32]);
    let employee = register_employee(
        service.store(),
        NewEmployee::new("Kamran Ali", email).designation("Lineman"),
        "Field-Work-2024!",
        &mut entropy,
    )?;
    Ok(employee)
}

fn approve_with(employee_id: Option<u64>, estimated_charges: Option<u32>) -> Action {
    Action::Approve(ApprovePayload {
        employee_id,
        estimated_charges: estimated_charges.map(Amount::from),
        inspection_date: None,
    })
}

fn create_customer() -> Action {
    Action::CreateCustomer(CreateCustomerPayload {
        zone: Some("North".into()),
    })
}

/// Walk one request from submission to an active customer and check that
/// every dependent record was written.
#[test]
fn submission_to_connected_customer() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("lifecycle.db")?;
    let employee = technician(&service, "kamran@desk.example")?;

    let request = service
        .submit_request(applicant("Sana Mir", "sana@example.com", "03001112233", "Lahore"))
        .context("Submit failed: ")?;
    assert_eq!(request.status, RequestStatus::Pending);
    assert!(request.application_number.starts_with("APP-"));

    let inspection = service.apply_transition(
        request.id,
        Action::ScheduleInspection(InspectionPayload {
            inspection_date: TimeStamp::new().plus_days(2).context("inspection date")?,
            estimated_charges: Amount::from(1500),
        }),
    )?;
    assert_eq!(inspection.new_status, RequestStatus::UnderReview);
    assert!(service.request(request.id)?.inspected_at.is_some());

    let approval = service
        .apply_transition(request.id, approve_with(Some(employee.id), None))
        .context("Approve failed: ")?;
    assert_eq!(approval.new_status, RequestStatus::Approved);
    let Some(GeneratedFields::Approval {
        account_number,
        temporary_password: Some(password),
    }) = approval.generated
    else {
        panic!("approval must hand out an account number and a password");
    };
    assert!(account_number.starts_with("ELX-"));

    let stored = service.request(request.id)?;
    let credential = stored.credential.context("credential stored on approval")?;
    assert!(verify_password(password.expose(), &credential.password_hash));
    assert!(!credential.password_hash.contains(password.expose()));
    // the estimate from the inspection survives an approval without one
    assert_eq!(stored.estimated_charges, Some(Amount::from(1500)));

    let work_order_id = approval.work_order_id.context("work order for the assignee")?;
    let order = service.store().work_order(work_order_id)?.context("work order stored")?;
    assert_eq!(order.connection_request_id, request.id);
    assert_eq!(order.priority, Priority::High);
    assert!(order.title.contains(&request.application_number));
    service.start_work_order(work_order_id)?;

    let activation = service
        .apply_transition(request.id, create_customer())
        .context("Create customer failed: ")?;
    assert_eq!(activation.new_status, RequestStatus::Connected);
    let Some(GeneratedFields::Customer {
        customer_id,
        account_number: customer_account,
        meter_number,
        temporary_password,
        bill_id,
        ..
    }) = activation.generated
    else {
        panic!("create_customer must describe the new customer");
    };
    assert_eq!(customer_account, account_number);
    assert!(meter_number.starts_with("MTR-LHE-"));
    assert!(is_valid_meter_number(&meter_number));
    // the password went out with the approval and is not shown again
    assert!(temporary_password.is_none());

    let customer = service.store().customer(customer_id)?.context("customer stored")?;
    assert_eq!(customer.status, CustomerStatus::Active);
    assert_eq!(customer.outstanding_balance, Amount::from(1500));
    assert_eq!(customer.zone.as_deref(), Some("North"));

    let bills = service.store().bills_for_customer(customer_id)?;
    assert_eq!(bills.len(), 1);
    assert_eq!(Some(bills[0].id), bill_id);
    assert_eq!(bills[0].kind, BillKind::ConnectionFee);
    assert_eq!(bills[0].charges.total_amount, Amount::from(1500));
    assert_eq!(bills[0].units_consumed, Amount::ZERO);
    assert_eq!(bills[0].due_date, bills[0].issue_date.plus_days(14).context("due")?);

    let order = service.store().work_order(work_order_id)?.context("work order stored")?;
    assert_eq!(order.status, WorkOrderStatus::Completed);
    assert_eq!(order.customer_id, Some(customer_id));

    let user = service
        .store()
        .user_by_email("sana@example.com")?
        .context("customer login created")?;
    assert_eq!(user.id, customer.user_id);
    assert_eq!(user.password_hash, credential.password_hash);

    let installed = service.apply_transition(request.id, Action::CompleteInstallation)?;
    assert_eq!(installed.new_status, RequestStatus::Connected);
    let first_install = service.request(request.id)?.installed_at;
    assert!(first_install.is_some());
    service.apply_transition(request.id, Action::CompleteInstallation)?;
    assert_eq!(service.request(request.id)?.installed_at, first_install);

    let actions: Vec<String> = service
        .history(request.id)?
        .into_iter()
        .map(|record| record.action)
        .collect();
    assert_eq!(
        actions,
        [
            "schedule_inspection",
            "approve",
            "create_customer",
            "complete_installation",
            "complete_installation"
        ]
    );

    let employee_user = employee.user_id.context("employee login")?;
    assert_eq!(service.store().notifications_for(employee_user)?.len(), 1);
    assert_eq!(service.store().notifications_for(user.id)?.len(), 1);

    Ok(())
}

/// A retried approval must not mint a second account number or password.
#[test]
fn approving_twice_replays_the_first_approval() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("approve_twice.db")?;
    let request = service.submit_request(applicant(
        "Hamza Iqbal",
        "hamza@example.com",
        "03214445566",
        "Karachi",
    ))?;

    let first = service.apply_transition(request.id, approve_with(None, Some(800)))?;
    let stored_hash = service.request(request.id)?.credential.map(|c| c.password_hash);
    let second = service.apply_transition(request.id, approve_with(None, Some(900)))?;

    let (
        Some(GeneratedFields::Approval {
            account_number: first_account,
            temporary_password: Some(_),
        }),
        Some(GeneratedFields::Approval {
            account_number: second_account,
            temporary_password: None,
        }),
    ) = (first.generated, second.generated)
    else {
        panic!("the password is surfaced by the first approval only");
    };
    assert_eq!(first_account, second_account);
    assert!(!first.replayed);
    assert!(second.replayed);

    let after = service.request(request.id)?;
    assert_eq!(after.credential.map(|c| c.password_hash), stored_hash);
    assert_eq!(after.estimated_charges, Some(Amount::from(800)));
    assert_eq!(service.history(request.id)?.len(), 1);
    Ok(())
}

#[test]
fn concurrent_approvals_issue_one_credential() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("approve_race.db")?;
    let request = service.submit_request(applicant(
        "Nida Farooq",
        "nida@example.com",
        "03335556677",
        "Multan",
    ))?;

    let outcomes = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| service.apply_transition(request.id, approve_with(None, None))))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("approval thread panicked"))
            .collect::<Result<Vec<_>, _>>()
    })?;

    let fresh = outcomes.iter().filter(|o| !o.replayed).count();
    assert_eq!(fresh, 1);
    let accounts: Vec<_> = outcomes
        .iter()
        .filter_map(|o| match &o.generated {
            Some(GeneratedFields::Approval { account_number, .. }) => Some(account_number.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(accounts.len(), 4);
    assert!(accounts.windows(2).all(|w| w[0] == w[1]));
    Ok(())
}

/// An installation that has not started blocks activation and nothing leaks.
#[test]
fn create_customer_requires_a_started_work_order() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("unstarted.db")?;
    let employee = technician(&service, "tech@desk.example")?;
    let request = service.submit_request(applicant(
        "Ali Raza",
        "ali@example.com",
        "03001234000",
        "Islamabad",
    ))?;
    let approval =
        service.apply_transition(request.id, approve_with(Some(employee.id), Some(1500)))?;

    let err = service
        .apply_transition(request.id, create_customer())
        .expect_err("work order is still assigned");
    assert!(matches!(err, DeskError::PreconditionFailed(_)));
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert!(err.nothing_changed());

    assert_eq!(service.request(request.id)?.status, RequestStatus::Approved);
    assert!(service.store().user_by_email("ali@example.com")?.is_none());
    assert_eq!(service.store().meter_sequence("Islamabad")?, 0);
    let order = service
        .store()
        .work_order(approval.work_order_id.context("work order")?)?
        .context("work order stored")?;
    assert_eq!(order.status, WorkOrderStatus::Assigned);
    assert_eq!(order.customer_id, None);
    Ok(())
}

#[test]
fn requests_without_a_fee_get_no_bill() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("no_fee.db")?;
    let employee = technician(&service, "tech@desk.example")?;
    let request = service.submit_request(applicant(
        "Zara Shah",
        "zara@example.com",
        "03001230000",
        "Quetta",
    ))?;
    let approval = service.apply_transition(request.id, approve_with(Some(employee.id), None))?;
    let work_order_id = approval.work_order_id.context("work order")?;
    service.start_work_order(work_order_id)?;
    service.complete_work_order(work_order_id, Some("meter fitted"))?;

    let activation = service.apply_transition(request.id, create_customer())?;
    let Some(GeneratedFields::Customer {
        customer_id,
        bill_id,
        meter_number,
        ..
    }) = activation.generated
    else {
        panic!("customer expected");
    };
    assert_eq!(bill_id, None);
    assert!(meter_number.starts_with("MTR-QTA-"));
    assert!(service.store().bills_for_customer(customer_id)?.is_empty());
    let customer = service.store().customer(customer_id)?.context("customer")?;
    assert_eq!(customer.outstanding_balance, Amount::ZERO);
    assert_eq!(customer.payment_status, PaymentStatus::Paid);

    let order = service.store().work_order(work_order_id)?.context("work order")?;
    assert_eq!(order.completion_notes.as_deref(), Some("meter fitted"));
    Ok(())
}

#[test]
fn actions_outside_the_table_are_refused() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("invalid.db")?;
    let request = service.submit_request(applicant(
        "Omar Khan",
        "omar@example.com",
        "03007654321",
        "Peshawar",
    ))?;

    for action in [create_customer(), Action::CompleteInstallation] {
        let err = service
            .apply_transition(request.id, action)
            .expect_err("pending requests cannot skip ahead");
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }
    assert_eq!(service.request(request.id)?.status, RequestStatus::Pending);

    service.apply_transition(
        request.id,
        Action::Reject(RejectPayload {
            notes: Some("incomplete documents".into()),
        }),
    )?;
    for action in [
        approve_with(None, None),
        Action::Reject(RejectPayload::default()),
        create_customer(),
    ] {
        let err = service.apply_transition(request.id, action).unwrap_err();
        assert!(matches!(
            err,
            DeskError::InvalidTransition {
                status: RequestStatus::Rejected,
                ..
            }
        ));
    }

    let missing = service.apply_transition(9_999, approve_with(None, None));
    assert!(matches!(missing, Err(DeskError::RequestNotFound(9_999))));
    Ok(())
}

#[test]
fn rejection_notifies_an_existing_account_and_frees_the_applicant() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("reject.db")?;
    let mut entropy = Entropy::from_seed([1; 32]);
    let user = register_user(
        service.store(),
        "bilal@example.com",
        "Bilal Ahmed",
        UserType::Customer,
        "Existing-Login-1",
        &mut entropy,
    )?;

    let request = service.submit_request(applicant(
        "Bilal Ahmed",
        "bilal@example.com",
        "03451112222",
        "Sialkot",
    ))?;
    let duplicate = service.submit_request(applicant(
        "Bilal Ahmed",
        "BILAL@example.com",
        "03450000000",
        "Sialkot",
    ));
    assert!(matches!(duplicate, Err(DeskError::DuplicateApplication(_))));

    service.apply_transition(
        request.id,
        Action::Reject(RejectPayload {
            notes: Some("outside service area".into()),
        }),
    )?;

    let stored = service.request(request.id)?;
    assert_eq!(stored.status, RequestStatus::Rejected);
    assert_eq!(stored.rejection_notes.as_deref(), Some("outside service area"));

    let notes = service.store().notifications_for(user.id)?;
    assert_eq!(notes.len(), 1);
    assert!(notes[0].notice.message.contains("outside service area"));

    // a settled application no longer blocks a new one
    service.submit_request(applicant(
        "Bilal Ahmed",
        "bilal@example.com",
        "03451112222",
        "Sialkot",
    ))?;
    Ok(())
}

fn seed_approved_request(
    store: &Store,
    email: &str,
    city: &str,
    account_number: &str,
    credential: Option<IssuedCredential>,
) -> anyhow::Result<(ConnectionRequest, WorkOrder)> {
    let now = TimeStamp::new();
    let request = ConnectionRequest {
        id: store.next_id()?,
        application_number: format!("APP-2023-{}", 100_000 + store.next_id()?),
        applicant_name: "Legacy Applicant".into(),
        email: email.into(),
        phone: format!("0300{}", store.next_id()?),
        property_address: "Plot 9, Industrial Estate".into(),
        city: city.into(),
        state: None,
        pincode: None,
        property_type: PropertyType::Commercial,
        connection_type: ConnectionType::ThreePhase,
        load_required_kw: Some(Amount::from(20)),
        preferred_date: None,
        status: RequestStatus::Approved,
        estimated_charges: Some(Amount::from(2500)),
        inspection_date: None,
        applied_at: now,
        approved_at: Some(now),
        inspected_at: None,
        installed_at: None,
        account_number: Some(account_number.into()),
        credential,
        rejection_notes: None,
        customer_id: None,
    };
    let order = WorkOrder {
        id: store.next_id()?,
        connection_request_id: request.id,
        employee_id: None,
        customer_id: None,
        work_type: WorkType::NewConnection,
        title: format!("New Connection Installation - {}", request.application_number),
        description: "Install new three-phase connection".into(),
        status: WorkOrderStatus::InProgress,
        priority: Priority::High,
        assigned_date: now,
        due_date: now.plus_days(7).context("due date")?,
        completion_date: None,
        completion_notes: None,
    };
    store.transaction(|uow| {
        uow.insert_request(&request)?;
        uow.create_work_order(&order)
    })?;
    Ok((request, order))
}

/// A generated identifier that already exists aborts the whole unit of work.
#[test]
fn account_number_collision_rolls_everything_back() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("collision.db")?;
    let store = service.store().clone();
    let mut entropy = Entropy::from_seed([2; 32]);
    let taken = "ELX-2023-000001-ABCD";

    let existing = Customer {
        id: store.next_id()?,
        user_id: 0,
        connection_request_id: None,
        account_number: taken.into(),
        meter_number: "MTR-FSD-900000".into(),
        full_name: "Imported Customer".into(),
        email: "imported@example.com".into(),
        phone: "0411234567".into(),
        address: "Jhang Road".into(),
        city: "Faisalabad".into(),
        state: None,
        pincode: None,
        zone: None,
        property_type: PropertyType::Residential,
        status: CustomerStatus::Active,
        connection_date: TimeStamp::new(),
        last_bill_amount: Amount::ZERO,
        outstanding_balance: Amount::ZERO,
        payment_status: PaymentStatus::Paid,
    };
    store.transaction(|uow| uow.create_customer(&existing))?;

    let credential = IssuedCredential {
        password_hash: hash_password("Legacy-Password-1", &mut entropy)?,
        issued_at: TimeStamp::new(),
    };
    let (request, order) = seed_approved_request(
        &store,
        "legacy@example.com",
        "Faisalabad",
        taken,
        Some(credential),
    )?;

    let err = service
        .apply_transition(request.id, create_customer())
        .expect_err("account number is already used");
    assert_eq!(err.kind(), ErrorKind::IdentifierCollision);
    assert!(err.nothing_changed());

    assert_eq!(service.request(request.id)?.status, RequestStatus::Approved);
    assert!(store.user_by_email("legacy@example.com")?.is_none());
    assert_eq!(store.meter_sequence("Faisalabad")?, 0);
    let order = store.work_order(order.id)?.context("work order")?;
    assert_eq!(order.status, WorkOrderStatus::InProgress);
    assert!(service.history(request.id)?.is_empty());
    Ok(())
}

/// Requests approved before credentials existed receive one at activation.
#[test]
fn legacy_approval_receives_a_credential_once() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("legacy.db")?;
    let (request, _) = seed_approved_request(
        service.store(),
        "oldtimer@example.com",
        "Hyderabad",
        "ELX-2022-123456-0F0F",
        None,
    )?;

    let activation = service.apply_transition(request.id, create_customer())?;
    let Some(GeneratedFields::Customer {
        temporary_password: Some(password),
        account_number,
        bill_id,
        ..
    }) = activation.generated
    else {
        panic!("a credential is issued for legacy requests");
    };
    assert_eq!(account_number, "ELX-2022-123456-0F0F");
    assert!(bill_id.is_some());

    let user = service
        .store()
        .user_by_email("oldtimer@example.com")?
        .context("login created")?;
    assert!(verify_password(password.expose(), &user.password_hash));
    let stored = service.request(request.id)?.credential.context("credential kept")?;
    assert_eq!(stored.password_hash, user.password_hash);
    Ok(())
}

/// Same-city activations racing each other never share a meter number.
#[test]
fn concurrent_activations_get_distinct_meter_numbers() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("meters.db")?;
    let mut requests = Vec::new();
    for n in 0..6 {
        let (request, _) = seed_approved_request(
            service.store(),
            &format!("racer{n}@example.com"),
            "Rawalpindi",
            &format!("ELX-2024-00000{n}-AAAA"),
            None,
        )?;
        requests.push(request.id);
    }

    let meters = std::thread::scope(|scope| {
        let handles: Vec<_> = requests
            .iter()
            .map(|id| {
                let service = &service;
                scope.spawn(move || service.apply_transition(*id, create_customer()))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("activation thread panicked"))
            .map(|outcome| -> Result<String, DeskError> {
                match outcome?.generated {
                    Some(GeneratedFields::Customer { meter_number, .. }) => Ok(meter_number),
                    other => panic!("unexpected outcome {other:?}"),
                }
            })
            .collect::<Result<Vec<_>, DeskError>>()
    })?;

    let mut unique = meters.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 6);
    assert!(meters.iter().all(|m| m.starts_with("MTR-RWP-")));
    assert_eq!(service.store().meter_sequence("Rawalpindi")?, 6);
    Ok(())
}

struct NoEntropy;

impl EntropySource for NoEntropy {
    fn open(&self) -> Result<Entropy, IdentifierError> {
        Err(IdentifierError::EntropyUnavailable("getrandom failed".into()))
    }
}

#[test]
fn missing_entropy_fails_closed() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("entropy.db")?;
    let request = service.submit_request(applicant(
        "Hina Aslam",
        "hina@example.com",
        "03121231234",
        "Sukkur",
    ))?;

    let starved = ConnectionService::new(service.store().clone(), AppConfig::default())
        .with_entropy(Arc::new(NoEntropy));
    let err = starved
        .apply_transition(request.id, approve_with(None, None))
        .expect_err("no weak fallback");
    assert!(matches!(
        err,
        DeskError::Identifier(IdentifierError::EntropyUnavailable(_))
    ));

    let stored = service.request(request.id)?;
    assert_eq!(stored.status, RequestStatus::Pending);
    assert!(stored.account_number.is_none());
    assert!(stored.credential.is_none());

    // transitions that generate nothing still work
    starved.apply_transition(
        request.id,
        Action::ScheduleInspection(InspectionPayload {
            inspection_date: TimeStamp::new(),
            estimated_charges: Amount::from(700),
        }),
    )?;
    Ok(())
}

struct BrokenNotifier;

impl Notifier for BrokenNotifier {
    fn notify(&self, _user_id: u64, _notice: &Notice) -> Result<(), NotificationError> {
        Err(NotificationError("smtp relay down".into()))
    }
}

#[test]
fn notification_failures_do_not_block_transitions() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("notifier.db")?;
    let employee = technician(&service, "tech@desk.example")?;
    let service = service.with_notifier(Arc::new(BrokenNotifier));

    let request = service.submit_request(applicant(
        "Saad Malik",
        "saad@example.com",
        "03019998888",
        "Sargodha",
    ))?;
    let approval = service.apply_transition(request.id, approve_with(Some(employee.id), None))?;

    assert_eq!(approval.new_status, RequestStatus::Approved);
    assert!(approval.work_order_id.is_some());
    Ok(())
}

#[test]
fn unknown_assignees_are_refused_before_any_write() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("assignee.db")?;
    let request = service.submit_request(applicant(
        "Ayesha Noor",
        "ayesha@example.com",
        "03017776666",
        "Larkana",
    ))?;

    let err = service
        .apply_transition(request.id, approve_with(Some(4_242), None))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert_eq!(service.request(request.id)?.status, RequestStatus::Pending);
    assert!(service.work_orders_for_request(request.id)?.is_empty());
    Ok(())
}

#[test]
fn work_orders_only_move_forward() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("work_orders.db")?;
    let employee = technician(&service, "tech@desk.example")?;
    let request = service.submit_request(applicant(
        "Fahad Butt",
        "fahad@example.com",
        "03216665555",
        "Gujranwala",
    ))?;
    let approval = service.apply_transition(request.id, approve_with(Some(employee.id), None))?;
    let id = approval.work_order_id.context("work order")?;

    let early = service.complete_work_order(id, None).unwrap_err();
    assert!(matches!(early, DeskError::InvalidWorkOrderMove { .. }));

    service.start_work_order(id)?;
    assert!(service.start_work_order(id).is_err());
    service.complete_work_order(id, None)?;
    assert!(service.start_work_order(id).is_err());
    assert!(matches!(
        service.start_work_order(77_777),
        Err(DeskError::WorkOrderNotFound(77_777))
    ));
    Ok(())
}

#[test]
fn consumption_bills_accumulate_on_the_balance() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("consumption.db")?;
    let (request, _) = seed_approved_request(
        service.store(),
        "meter@example.com",
        "Bahawalpur",
        "ELX-2024-654321-BEEF",
        None,
    )?;
    let activation = service.apply_transition(request.id, create_customer())?;
    let Some(GeneratedFields::Customer { customer_id, .. }) = activation.generated else {
        panic!("customer expected");
    };

    let schedule = TariffSchedule::new(Decimal::from(100), Decimal::ZERO, Decimal::ZERO)
        .with_slab(Decimal::ZERO, Some(Decimal::from(100)), Decimal::from(5))
        .with_slab(Decimal::from(100), Some(Decimal::from(300)), Decimal::from(7))
        .with_slab(Decimal::from(300), None, Decimal::from(10));
    let billing = BillingService::new(service.store().clone(), AppConfig::default());

    let bill = billing.issue_consumption_bill(customer_id, Decimal::from(250), &schedule)?;
    assert_eq!(bill.charges.base_amount, Amount::from(1550));
    assert_eq!(bill.charges.total_amount, Amount::from(1650));
    // consumption bills follow their own due offset, not the connection fee's
    assert_eq!(bill.due_date, bill.issue_date.plus_days(15).context("due")?);

    let refused = billing.issue_consumption_bill(customer_id, Decimal::from(-5), &schedule);
    assert!(matches!(refused, Err(DeskError::Tariff(_))));

    let customer = service.store().customer(customer_id)?.context("customer")?;
    // 2500 connection fee plus one consumption bill
    assert_eq!(customer.outstanding_balance, Amount::from(4150));
    assert_eq!(customer.last_bill_amount, Amount::from(1650));
    assert_eq!(billing.bills_for_customer(customer_id)?.len(), 2);
    Ok(())
}

#[test]
fn unstorable_due_dates_are_refused_before_any_write() -> anyhow::Result<()> {
    let (_temp_dir, service) = open_desk("due_dates.db")?;
    let employee = technician(&service, "tech@desk.example")?;
    let request = service.submit_request(applicant(
        "Zainab Shah",
        "zainab@example.com",
        "03125554444",
        "Sukkur",
    ))?;

    // bypasses AppConfig::validate, as a hand-built config would
    let mut config = AppConfig::default();
    config.billing.work_order_due_days = i64::MAX;
    config.billing.consumption_due_days = i64::MAX;
    let careless = ConnectionService::new(service.store().clone(), config.clone());

    let err = careless
        .apply_transition(request.id, approve_with(Some(employee.id), None))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(err.nothing_changed());
    let stored = service.request(request.id)?;
    assert_eq!(stored.status, RequestStatus::Pending);
    assert!(stored.account_number.is_none());
    assert!(service.work_orders_for_request(request.id)?.is_empty());

    let (legacy, _) = seed_approved_request(
        service.store(),
        "due@example.com",
        "Quetta",
        "ELX-2024-777777-CAFE",
        None,
    )?;
    let activation = service.apply_transition(legacy.id, create_customer())?;
    let Some(GeneratedFields::Customer { customer_id, .. }) = activation.generated else {
        panic!("customer expected");
    };
    let schedule = TariffSchedule::new(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
        .with_slab(Decimal::ZERO, None, Decimal::from(5));
    let billing = BillingService::new(service.store().clone(), config);
    let refused = billing.issue_consumption_bill(customer_id, Decimal::from(10), &schedule);
    assert!(matches!(refused, Err(DeskError::InvalidPayload(_))));
    // only the connection fee was billed
    assert_eq!(billing.bills_for_customer(customer_id)?.len(), 1);
    Ok(())
}
