//! Recipient lookup and notification delivery.
//!
//! The lifecycle only needs two questions answered (who is employee N, does
//! this email have an account) and one fire-and-forget delivery. Both sides
//! are traits so a hosting service can plug in its own directory; [`Store`]
//! implements them against the same sled database.
use crate::error::{DeskError, NotificationError, StoreError};
use crate::identifiers::{Entropy, hash_password};
use crate::model::{Employee, EmployeeStatus, Notice, Notification, UserAccount, UserType};
use crate::store::Store;
use crate::types::TimeStamp;

pub trait Directory: Send + Sync {
    fn find_employee_by_id(&self, id: u64) -> Result<Option<Employee>, StoreError>;
    fn find_user_by_email(&self, email: &str) -> Result<Option<UserAccount>, StoreError>;
}

pub trait Notifier: Send + Sync {
    fn notify(&self, user_id: u64, notice: &Notice) -> Result<(), NotificationError>;
}

impl Directory for Store {
    fn find_employee_by_id(&self, id: u64) -> Result<Option<Employee>, StoreError> {
        self.employee(id)
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<UserAccount>, StoreError> {
        self.user_by_email(email)
    }
}

impl Notifier for Store {
    fn notify(&self, user_id: u64, notice: &Notice) -> Result<(), NotificationError> {
        let id = self
            .next_id()
            .map_err(|e| NotificationError(e.to_string()))?;
        let notification = Notification {
            id,
            user_id,
            notice: notice.clone(),
            is_read: false,
            created_at: TimeStamp::new(),
        };
        self.transaction(|uow| uow.create_notification(&notification))
            .map_err(|e| NotificationError(e.to_string()))
    }
}

/// Details for a new staff member.
#[derive(Debug, Clone)]
pub struct NewEmployee {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub designation: String,
    pub department: String,
}

impl NewEmployee {
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            phone: String::new(),
            designation: "Field Technician".to_string(),
            department: "Operations".to_string(),
        }
    }
    pub fn phone(mut self, phone: &str) -> Self {
        self.phone = phone.to_string();
        self
    }
    pub fn designation(mut self, designation: &str) -> Self {
        self.designation = designation.to_string();
        self
    }
    pub fn department(mut self, department: &str) -> Self {
        self.department = department.to_string();
        self
    }
}

/// Create a staff login and the employee record that points at it.
pub fn register_employee(
    store: &Store,
    employee: NewEmployee,
    password: &str,
    entropy: &mut Entropy,
) -> Result<Employee, DeskError> {
    let user = register_user(
        store,
        &employee.email,
        &employee.name,
        UserType::Employee,
        password,
        entropy,
    )?;
    let record = Employee {
        id: store.next_id()?,
        user_id: Some(user.id),
        name: employee.name,
        email: employee.email,
        phone: employee.phone,
        designation: employee.designation,
        department: employee.department,
        status: EmployeeStatus::Active,
    };
    store.transaction(|uow| uow.create_employee(&record))?;
    Ok(record)
}

/// Create a login. Emails are unique, case-insensitively.
pub fn register_user(
    store: &Store,
    email: &str,
    name: &str,
    user_type: UserType,
    password: &str,
    entropy: &mut Entropy,
) -> Result<UserAccount, DeskError> {
    if !email.contains('@') {
        return Err(DeskError::InvalidPayload(format!("{email} is not an email address")));
    }
    let user = UserAccount {
        id: store.next_id()?,
        email: email.trim().to_string(),
        password_hash: hash_password(password, entropy)?,
        user_type,
        name: name.to_string(),
        phone: None,
        is_active: true,
    };
    store.transaction(|uow| uow.create_user(&user))?;
    Ok(user)
}
