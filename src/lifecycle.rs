//! Connection request state machine
//!
//! `pending -> under_review -> approved -> connected`, with `rejected` as a
//! terminal side branch from either of the first two states. Each row of
//! [`TRANSITIONS`] names the statuses an action is accepted from, the guard it
//! must pass, the effects it performs in order, and the status it lands in.
//! Nothing here touches storage; [`crate::service::ConnectionService`]
//! executes the planned effects inside one unit of work.
use crate::error::DeskError;
use crate::model::RequestStatus;
use crate::types::{Amount, TimeStamp};
use chrono::{NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Approve,
    Reject,
    ScheduleInspection,
    CreateCustomer,
    CompleteInstallation,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Approve,
        ActionKind::Reject,
        ActionKind::ScheduleInspection,
        ActionKind::CreateCustomer,
        ActionKind::CompleteInstallation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Approve => "approve",
            ActionKind::Reject => "reject",
            ActionKind::ScheduleInspection => "schedule_inspection",
            ActionKind::CreateCustomer => "create_customer",
            ActionKind::CompleteInstallation => "complete_installation",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DeskError::InvalidPayload(format!("unknown action {s}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovePayload {
    /// Assignee of the installation work order. No work order without one.
    pub employee_id: Option<u64>,
    pub estimated_charges: Option<Amount>,
    pub inspection_date: Option<TimeStamp<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RejectPayload {
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionPayload {
    pub inspection_date: TimeStamp<Utc>,
    pub estimated_charges: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateCustomerPayload {
    pub zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Approve(ApprovePayload),
    Reject(RejectPayload),
    ScheduleInspection(InspectionPayload),
    CreateCustomer(CreateCustomerPayload),
    CompleteInstallation,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Approve(_) => ActionKind::Approve,
            Action::Reject(_) => ActionKind::Reject,
            Action::ScheduleInspection(_) => ActionKind::ScheduleInspection,
            Action::CreateCustomer(_) => ActionKind::CreateCustomer,
            Action::CompleteInstallation => ActionKind::CompleteInstallation,
        }
    }

    /// Reject payloads no transition could accept. Runs before anything is read.
    pub fn validate(&self) -> Result<(), DeskError> {
        let negative = |amount: &Amount, field: &str| {
            if amount.is_negative() {
                Err(DeskError::InvalidPayload(format!("{field} must not be negative")))
            } else {
                Ok(())
            }
        };
        let storable = |date: &TimeStamp<Utc>| {
            if date.is_storable() {
                Ok(())
            } else {
                Err(DeskError::InvalidPayload("inspection_date is out of range".into()))
            }
        };
        match self {
            Action::Approve(p) => {
                p.estimated_charges
                    .as_ref()
                    .map_or(Ok(()), |a| negative(a, "estimated_charges"))?;
                p.inspection_date.as_ref().map_or(Ok(()), storable)
            }
            Action::ScheduleInspection(p) => {
                negative(&p.estimated_charges, "estimated_charges")?;
                storable(&p.inspection_date)
            }
            _ => Ok(()),
        }
    }

    /// Build an action from its wire name and `key=value` fields, e.g.
    /// `approve employee_id=4 estimated_charges=1500`.
    pub fn parse<'a>(
        name: &str,
        fields: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, DeskError> {
        let kind: ActionKind = name.parse()?;
        let mut employee_id = None;
        let mut estimated_charges = None;
        let mut inspection_date = None;
        let mut notes = None;
        let mut zone = None;

        for (key, value) in fields {
            match key {
                "employee_id" => {
                    employee_id = Some(value.parse::<u64>().map_err(|_| bad_field(key, value))?)
                }
                "estimated_charges" => {
                    estimated_charges =
                        Some(value.parse::<Amount>().map_err(|_| bad_field(key, value))?)
                }
                "inspection_date" => inspection_date = Some(parse_date(key, value)?),
                "notes" => notes = Some(value.to_string()),
                "zone" => zone = Some(value.to_string()),
                _ => {
                    return Err(DeskError::InvalidPayload(format!(
                        "{kind} does not take {key}"
                    )));
                }
            }
        }

        let action = match kind {
            ActionKind::Approve => Action::Approve(ApprovePayload {
                employee_id,
                estimated_charges,
                inspection_date,
            }),
            ActionKind::Reject => Action::Reject(RejectPayload { notes }),
            ActionKind::ScheduleInspection => Action::ScheduleInspection(InspectionPayload {
                inspection_date: inspection_date.ok_or_else(|| missing(kind, "inspection_date"))?,
                estimated_charges: estimated_charges
                    .ok_or_else(|| missing(kind, "estimated_charges"))?,
            }),
            ActionKind::CreateCustomer => Action::CreateCustomer(CreateCustomerPayload { zone }),
            ActionKind::CompleteInstallation => Action::CompleteInstallation,
        };
        action.validate()?;
        Ok(action)
    }
}

fn bad_field(key: &str, value: &str) -> DeskError {
    DeskError::InvalidPayload(format!("{key}={value} is not valid"))
}

fn missing(kind: ActionKind, key: &str) -> DeskError {
    DeskError::InvalidPayload(format!("{kind} requires {key}"))
}

fn parse_date(key: &str, value: &str) -> Result<TimeStamp<Utc>, DeskError> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| bad_field(key, value))?;
    let datetime = date.and_hms_opt(0, 0, 0).ok_or_else(|| bad_field(key, value))?;
    let stamp = TimeStamp::from(datetime.and_utc());
    if !stamp.is_storable() {
        return Err(DeskError::InvalidPayload(format!("{key}={value} is out of range")));
    }
    Ok(stamp)
}

/// Extra condition checked against related records inside the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    None,
    /// A linked work order is `in_progress` or `completed`.
    StartedWorkOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Account number and temporary credential, only if not already issued.
    IssueCredentials,
    RecordApproval,
    /// Only when the payload names an assignee.
    CreateWorkOrder,
    RecordRejection,
    RecordInspection,
    CreateUserAccount,
    CreateCustomer,
    /// Connection-fee bill plus the matching balance increment, when the
    /// estimate is positive.
    IssueConnectionBill,
    CompleteWorkOrder,
    RecordInstallation,
    NotifyAssignee,
    NotifyApplicant,
}

impl Effect {
    /// Notifications run after the commit and may fail without consequence.
    pub fn is_post_commit(&self) -> bool {
        matches!(self, Effect::NotifyAssignee | Effect::NotifyApplicant)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Apply,
    /// Retry of an already applied action: report the stored outcome, write nothing.
    Replay,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Transition {
    pub action: ActionKind,
    pub from: &'static [RequestStatus],
    pub guard: Guard,
    pub effects: &'static [Effect],
    pub to: RequestStatus,
    pub mode: Mode,
}

const OPEN: &[RequestStatus] = &[RequestStatus::Pending, RequestStatus::UnderReview];

pub static TRANSITIONS: &[Transition] = &[
    Transition {
        action: ActionKind::Approve,
        from: OPEN,
        guard: Guard::None,
        effects: &[
            Effect::IssueCredentials,
            Effect::RecordApproval,
            Effect::CreateWorkOrder,
            Effect::NotifyAssignee,
        ],
        to: RequestStatus::Approved,
        mode: Mode::Apply,
    },
    Transition {
        action: ActionKind::Approve,
        from: &[RequestStatus::Approved],
        guard: Guard::None,
        effects: &[],
        to: RequestStatus::Approved,
        mode: Mode::Replay,
    },
    Transition {
        action: ActionKind::Reject,
        from: OPEN,
        guard: Guard::None,
        effects: &[Effect::RecordRejection, Effect::NotifyApplicant],
        to: RequestStatus::Rejected,
        mode: Mode::Apply,
    },
    Transition {
        action: ActionKind::ScheduleInspection,
        from: OPEN,
        guard: Guard::None,
        effects: &[Effect::RecordInspection],
        to: RequestStatus::UnderReview,
        mode: Mode::Apply,
    },
    Transition {
        action: ActionKind::CreateCustomer,
        from: &[RequestStatus::Approved],
        guard: Guard::StartedWorkOrder,
        effects: &[
            Effect::CreateUserAccount,
            Effect::CreateCustomer,
            Effect::IssueConnectionBill,
            Effect::CompleteWorkOrder,
            Effect::NotifyApplicant,
        ],
        to: RequestStatus::Connected,
        mode: Mode::Apply,
    },
    Transition {
        action: ActionKind::CompleteInstallation,
        from: &[RequestStatus::Connected],
        guard: Guard::None,
        effects: &[Effect::RecordInstallation],
        to: RequestStatus::Connected,
        mode: Mode::Apply,
    },
];

/// The row accepting `action` from `status`, or `InvalidTransition`.
pub fn plan(status: RequestStatus, action: ActionKind) -> Result<&'static Transition, DeskError> {
    TRANSITIONS
        .iter()
        .find(|t| t.action == action && t.from.contains(&status))
        .ok_or(DeskError::InvalidTransition {
            action: action.as_str(),
            status,
        })
}

impl Transition {
    pub fn performs(&self, effect: Effect) -> bool {
        self.effects.contains(&effect)
    }
}
