//! Operation names and their typed request/response schemas.
//!
//! Each operation crossing the broker has an explicit schema here. Requests are
//! decoded with [`FromPayload`] on the responder side, responses on the caller
//! side, so both ends validate field by field.
//!
//! | Operation | Request | Response |
//! |---|---|---|
//! | [`SEND_MAIL`] | [`MailMessage`] | [`MailReceipt`] |
//! | [`GET_EMPLOYEE_PROFILE`] | [`ProfileLookup`] | [`EmployeeProfile`] |
//! | [`FIND_EMPLOYEE_BY_ID`] | [`ProfileLookup`] | [`EmployeeProfile`] |
//! | [`CREATE_ONBOARDING_TASKS`] | [`OnboardingTasksRequest`] | [`OnboardingTasksCreated`] |
//! | [`COUNT_KANBAN_PROGRESS`] | [`KanbanProgressRequest`] | [`KanbanProgress`] |

use crate::payload::{FieldError, FromPayload, IntoPayload, Payload, PayloadReader};
use chrono::NaiveDate;
use serde_json::Value;

/// Send an e-mail.
pub const SEND_MAIL: &str = "send_mail";

/// Look up an onboarding employee profile held by this service.
pub const GET_EMPLOYEE_PROFILE: &str = "get_employee_profile";

/// Look up an employee in the employee service.
pub const FIND_EMPLOYEE_BY_ID: &str = "find_employee_by_id";

/// Create the onboarding task set for a new employee.
pub const CREATE_ONBOARDING_TASKS: &str = "create_onboarding_tasks";

/// Count an employee's kanban tasks per column.
pub const COUNT_KANBAN_PROGRESS: &str = "count_kanban_progress";

/// Status reported by a successful mail send.
pub const MAIL_SENT: &str = "sent";

fn string(value: impl Into<String>) -> Value {
    Value::String(value.into())
}

fn optional_string(payload: &mut Payload, field: &str, value: Option<String>) {
    if let Some(value) = value {
        payload.insert(field.to_string(), string(value));
    }
}

/// E-mail to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

impl FromPayload for MailMessage {
    fn from_payload(payload: &Payload) -> Result<Self, FieldError> {
        let reader = PayloadReader::new(payload);
        Ok(Self {
            to: reader.string("to")?,
            subject: reader.string("subject")?,
            body: reader.string("body")?,
        })
    }
}

impl IntoPayload for MailMessage {
    fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("to".to_string(), string(self.to));
        payload.insert("subject".to_string(), string(self.subject));
        payload.insert("body".to_string(), string(self.body));
        payload
    }
}

/// Outcome of a mail send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailReceipt {
    /// Delivery status, [`MAIL_SENT`] on success
    pub status: String,
}

impl MailReceipt {
    /// Receipt for a mail handed to the transport.
    #[must_use]
    pub fn sent() -> Self {
        Self {
            status: MAIL_SENT.to_string(),
        }
    }
}

impl FromPayload for MailReceipt {
    fn from_payload(payload: &Payload) -> Result<Self, FieldError> {
        Ok(Self {
            status: PayloadReader::new(payload).string("status")?,
        })
    }
}

impl IntoPayload for MailReceipt {
    fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("status".to_string(), string(self.status));
        payload
    }
}

/// Lookup of a single employee by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLookup {
    /// Employee identifier
    pub employee_id: String,
}

impl FromPayload for ProfileLookup {
    fn from_payload(payload: &Payload) -> Result<Self, FieldError> {
        Ok(Self {
            employee_id: PayloadReader::new(payload).string("employee_id")?,
        })
    }
}

impl IntoPayload for ProfileLookup {
    fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("employee_id".to_string(), string(self.employee_id));
        payload
    }
}

/// Employee profile as exchanged between services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeProfile {
    /// Employee identifier
    pub id: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Work e-mail address
    pub email: String,
    /// Department, when assigned
    pub department: Option<String>,
    /// Job title, when assigned
    pub position: Option<String>,
}

impl EmployeeProfile {
    /// "First Last".
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl FromPayload for EmployeeProfile {
    fn from_payload(payload: &Payload) -> Result<Self, FieldError> {
        let reader = PayloadReader::new(payload);
        Ok(Self {
            id: reader.string("id")?,
            first_name: reader.string("first_name")?,
            last_name: reader.string("last_name")?,
            email: reader.string("email")?,
            department: reader.optional_string("department")?,
            position: reader.optional_string("position")?,
        })
    }
}

impl IntoPayload for EmployeeProfile {
    fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("id".to_string(), string(self.id));
        payload.insert("first_name".to_string(), string(self.first_name));
        payload.insert("last_name".to_string(), string(self.last_name));
        payload.insert("email".to_string(), string(self.email));
        optional_string(&mut payload, "department", self.department);
        optional_string(&mut payload, "position", self.position);
        payload
    }
}

/// Request to create the onboarding task set for an employee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingTasksRequest {
    /// Employee being onboarded
    pub employee_id: String,
    /// First working day; task due dates are derived from it
    pub start_date: NaiveDate,
    /// Optional mentor assigned to mentor-owned tasks
    pub mentor_id: Option<String>,
}

impl FromPayload for OnboardingTasksRequest {
    fn from_payload(payload: &Payload) -> Result<Self, FieldError> {
        let reader = PayloadReader::new(payload);
        Ok(Self {
            employee_id: reader.string("employee_id")?,
            start_date: reader.date("start_date")?,
            mentor_id: reader.optional_string("mentor_id")?,
        })
    }
}

impl IntoPayload for OnboardingTasksRequest {
    fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("employee_id".to_string(), string(self.employee_id));
        payload.insert(
            "start_date".to_string(),
            string(self.start_date.format("%Y-%m-%d").to_string()),
        );
        optional_string(&mut payload, "mentor_id", self.mentor_id);
        payload
    }
}

/// Tasks created for an onboarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingTasksCreated {
    /// Identifiers of the created tasks
    pub task_ids: Vec<String>,
}

impl FromPayload for OnboardingTasksCreated {
    fn from_payload(payload: &Payload) -> Result<Self, FieldError> {
        Ok(Self {
            task_ids: PayloadReader::new(payload).string_list("task_ids")?,
        })
    }
}

impl IntoPayload for OnboardingTasksCreated {
    fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("created".to_string(), Value::from(self.task_ids.len()));
        payload.insert(
            "task_ids".to_string(),
            Value::Array(self.task_ids.into_iter().map(Value::String).collect()),
        );
        payload
    }
}

/// Request for an employee's kanban progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KanbanProgressRequest {
    /// Employee whose board is counted
    pub employee_id: String,
}

impl FromPayload for KanbanProgressRequest {
    fn from_payload(payload: &Payload) -> Result<Self, FieldError> {
        Ok(Self {
            employee_id: PayloadReader::new(payload).string("employee_id")?,
        })
    }
}

impl IntoPayload for KanbanProgressRequest {
    fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("employee_id".to_string(), string(self.employee_id));
        payload
    }
}

/// Task counts per kanban column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KanbanProgress {
    /// Not started
    pub todo: u64,
    /// In progress
    pub in_progress: u64,
    /// Completed
    pub done: u64,
}

impl KanbanProgress {
    /// Total number of tasks on the board.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.todo + self.in_progress + self.done
    }
}

impl FromPayload for KanbanProgress {
    fn from_payload(payload: &Payload) -> Result<Self, FieldError> {
        let reader = PayloadReader::new(payload);
        Ok(Self {
            todo: reader.u64("todo")?,
            in_progress: reader.u64("in_progress")?,
            done: reader.u64("done")?,
        })
    }
}

impl IntoPayload for KanbanProgress {
    fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("todo".to_string(), Value::from(self.todo));
        payload.insert("in_progress".to_string(), Value::from(self.in_progress));
        payload.insert("done".to_string(), Value::from(self.done));
        payload.insert("total".to_string(), Value::from(self.total()));
        payload
    }
}
