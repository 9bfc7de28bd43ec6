//! Persistent records of the connection desk
use crate::types::{Amount, TimeStamp};
use chrono::Utc;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    UnderReview,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
    #[n(4)]
    Connected,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 5] = [
        RequestStatus::Pending,
        RequestStatus::UnderReview,
        RequestStatus::Approved,
        RequestStatus::Rejected,
        RequestStatus::Connected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::UnderReview => "under_review",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Connected => "connected",
        }
    }
    /// Position along the forward path. `Rejected` sits beside `Approved`.
    pub fn rank(&self) -> u8 {
        match self {
            RequestStatus::Pending => 0,
            RequestStatus::UnderReview => 1,
            RequestStatus::Approved | RequestStatus::Rejected => 2,
            RequestStatus::Connected => 3,
        }
    }
    /// An applicant may hold only one application in one of these states.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RequestStatus::Pending | RequestStatus::UnderReview | RequestStatus::Approved
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    #[n(0)]
    Residential,
    #[n(1)]
    Commercial,
    #[n(2)]
    Industrial,
    #[n(3)]
    Agricultural,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    #[n(0)]
    SinglePhase,
    #[n(1)]
    ThreePhase,
    #[n(2)]
    Industrial,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::SinglePhase => "single-phase",
            ConnectionType::ThreePhase => "three-phase",
            ConnectionType::Industrial => "industrial",
        }
    }
}

/// Hash of a one-time password. The plaintext is never stored.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    #[n(0)]
    pub password_hash: String,
    #[n(1)]
    pub issued_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub application_number: String,
    #[n(2)]
    pub applicant_name: String,
    #[n(3)]
    pub email: String,
    #[n(4)]
    pub phone: String,
    #[n(5)]
    pub property_address: String,
    #[n(6)]
    pub city: String,
    #[n(7)]
    pub state: Option<String>,
    #[n(8)]
    pub pincode: Option<String>,
    #[n(9)]
    pub property_type: PropertyType,
    #[n(10)]
    pub connection_type: ConnectionType,
    #[n(11)]
    pub load_required_kw: Option<Amount>,
    #[n(12)]
    pub preferred_date: Option<TimeStamp<Utc>>,
    #[n(13)]
    pub status: RequestStatus,
    #[n(14)]
    pub estimated_charges: Option<Amount>,
    #[n(15)]
    pub inspection_date: Option<TimeStamp<Utc>>,
    #[n(16)]
    pub applied_at: TimeStamp<Utc>,
    #[n(17)]
    pub approved_at: Option<TimeStamp<Utc>>,
    #[n(18)]
    pub inspected_at: Option<TimeStamp<Utc>>,
    #[n(19)]
    pub installed_at: Option<TimeStamp<Utc>>,
    // write-once, assigned at approval
    #[n(20)]
    pub account_number: Option<String>,
    #[n(21)]
    pub credential: Option<IssuedCredential>,
    #[n(22)]
    pub rejection_notes: Option<String>,
    #[n(23)]
    pub customer_id: Option<u64>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOrderStatus {
    #[n(0)]
    Assigned,
    #[n(1)]
    InProgress,
    #[n(2)]
    Completed,
    #[n(3)]
    Cancelled,
}

impl WorkOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Assigned => "assigned",
            WorkOrderStatus::InProgress => "in_progress",
            WorkOrderStatus::Completed => "completed",
            WorkOrderStatus::Cancelled => "cancelled",
        }
    }
    /// Field work has begun, so the customer account may be activated.
    pub fn is_started(&self) -> bool {
        matches!(self, WorkOrderStatus::InProgress | WorkOrderStatus::Completed)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkType {
    #[n(0)]
    NewConnection,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    #[n(0)]
    Low,
    #[n(1)]
    Normal,
    #[n(2)]
    High,
    #[n(3)]
    Urgent,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct WorkOrder {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub connection_request_id: u64,
    #[n(2)]
    pub employee_id: Option<u64>,
    #[n(3)]
    pub customer_id: Option<u64>,
    #[n(4)]
    pub work_type: WorkType,
    #[n(5)]
    pub title: String,
    #[n(6)]
    pub description: String,
    #[n(7)]
    pub status: WorkOrderStatus,
    #[n(8)]
    pub priority: Priority,
    #[n(9)]
    pub assigned_date: TimeStamp<Utc>,
    #[n(10)]
    pub due_date: TimeStamp<Utc>,
    #[n(11)]
    pub completion_date: Option<TimeStamp<Utc>>,
    #[n(12)]
    pub completion_notes: Option<String>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerStatus {
    #[n(0)]
    Active,
    #[n(1)]
    Suspended,
    #[n(2)]
    Inactive,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    #[n(0)]
    Paid,
    #[n(1)]
    Pending,
    #[n(2)]
    Overdue,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub user_id: u64,
    #[n(2)]
    pub connection_request_id: Option<u64>,
    #[n(3)]
    pub account_number: String,
    #[n(4)]
    pub meter_number: String,
    #[n(5)]
    pub full_name: String,
    #[n(6)]
    pub email: String,
    #[n(7)]
    pub phone: String,
    #[n(8)]
    pub address: String,
    #[n(9)]
    pub city: String,
    #[n(10)]
    pub state: Option<String>,
    #[n(11)]
    pub pincode: Option<String>,
    #[n(12)]
    pub zone: Option<String>,
    #[n(13)]
    pub property_type: PropertyType,
    #[n(14)]
    pub status: CustomerStatus,
    #[n(15)]
    pub connection_date: TimeStamp<Utc>,
    #[n(16)]
    pub last_bill_amount: Amount,
    // never negative
    #[n(17)]
    pub outstanding_balance: Amount,
    #[n(18)]
    pub payment_status: PaymentStatus,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillKind {
    #[n(0)]
    ConnectionFee,
    #[n(1)]
    Consumption,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillStatus {
    #[n(0)]
    Generated,
    #[n(1)]
    Issued,
    #[n(2)]
    Paid,
    #[n(3)]
    Overdue,
    #[n(4)]
    Cancelled,
}

/// Itemised amounts printed on a bill, rounded to cents.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Default)]
pub struct BillCharges {
    #[n(0)]
    pub base_amount: Amount,
    #[n(1)]
    pub fixed_charges: Amount,
    #[n(2)]
    pub electricity_duty: Amount,
    #[n(3)]
    pub gst_amount: Amount,
    #[n(4)]
    pub total_amount: Amount,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Bill {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub customer_id: u64,
    #[n(2)]
    pub bill_number: String,
    #[n(3)]
    pub kind: BillKind,
    #[n(4)]
    pub billing_month: TimeStamp<Utc>,
    #[n(5)]
    pub issue_date: TimeStamp<Utc>,
    #[n(6)]
    pub due_date: TimeStamp<Utc>,
    #[n(7)]
    pub units_consumed: Amount,
    #[n(8)]
    pub charges: BillCharges,
    #[n(9)]
    pub status: BillStatus,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserType {
    #[n(0)]
    Admin,
    #[n(1)]
    Employee,
    #[n(2)]
    Customer,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub email: String,
    #[n(2)]
    pub password_hash: String,
    #[n(3)]
    pub user_type: UserType,
    #[n(4)]
    pub name: String,
    #[n(5)]
    pub phone: Option<String>,
    #[n(6)]
    pub is_active: bool,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmployeeStatus {
    #[n(0)]
    Active,
    #[n(1)]
    Inactive,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Employee {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub user_id: Option<u64>,
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub email: String,
    #[n(4)]
    pub phone: String,
    #[n(5)]
    pub designation: String,
    #[n(6)]
    pub department: String,
    #[n(7)]
    pub status: EmployeeStatus,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticePriority {
    #[n(0)]
    Low,
    #[n(1)]
    Normal,
    #[n(2)]
    High,
}

/// Message handed to a [`crate::directory::Notifier`].
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    #[n(0)]
    pub title: String,
    #[n(1)]
    pub message: String,
    #[n(2)]
    pub priority: NoticePriority,
    #[n(3)]
    pub action_url: Option<String>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub user_id: u64,
    #[n(2)]
    pub notice: Notice,
    #[n(3)]
    pub is_read: bool,
    #[n(4)]
    pub created_at: TimeStamp<Utc>,
}

/// One entry of a request's audit trail, appended by every applied transition.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    #[n(0)]
    pub transition_id: String,
    #[n(1)]
    pub request_id: u64,
    #[n(2)]
    pub action: String,
    #[n(3)]
    pub from: RequestStatus,
    #[n(4)]
    pub to: RequestStatus,
    #[n(5)]
    pub recorded_at: TimeStamp<Utc>,
}
