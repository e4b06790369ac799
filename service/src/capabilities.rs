//! Local capabilities behind the inbound operations.
//!
//! Each trait is one collaborator the dispatch table calls into. The relational
//! store and real mail transport live outside this service; what ships here is
//! a console mailer for development and an in-memory onboarding store that
//! plans tasks from a fixed template.

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use onboarding_rpc_core::operations::{
    EmployeeProfile, KanbanProgress, MailMessage, OnboardingTasksRequest,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::info;

/// Capability failures. The `Display` text is what the requester sees.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The referenced record does not exist
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Record kind, e.g. `"employee"`
        kind: &'static str,
        /// Record id
        id: String,
    },

    /// The request was understood but refused
    #[error("{0}")]
    Rejected(String),

    /// A dependency could not be reached
    #[error("{0}")]
    Unavailable(String),
}

/// Sends mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver `message`.
    async fn send(&self, message: &MailMessage) -> Result<(), CapabilityError>;
}

/// Looks up employee profiles.
#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    /// Profile of `employee_id`.
    async fn profile(&self, employee_id: &str) -> Result<EmployeeProfile, CapabilityError>;
}

/// Creates onboarding task plans.
#[async_trait]
pub trait TaskPlanner: Send + Sync {
    /// Create the onboarding tasks for a new hire, returning their ids.
    async fn create_onboarding_tasks(
        &self,
        request: &OnboardingTasksRequest,
    ) -> Result<Vec<String>, CapabilityError>;
}

/// Reports kanban progress of onboarding tasks.
#[async_trait]
pub trait ProgressBoard: Send + Sync {
    /// Task counts per column for `employee_id`.
    async fn kanban_progress(&self, employee_id: &str) -> Result<KanbanProgress, CapabilityError>;
}

/// Console mailer.
///
/// Logs mails instead of sending them. Useful for development and tests where
/// no mail transport is available.
#[derive(Clone, Debug, Default)]
pub struct ConsoleMailer;

impl ConsoleMailer {
    /// Create a new console mailer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), CapabilityError> {
        if !message.to.contains('@') {
            return Err(CapabilityError::Rejected(format!(
                "invalid recipient '{}'",
                message.to
            )));
        }

        info!(
            to = %message.to,
            subject = %message.subject,
            body_len = message.body.len(),
            "📧 Mail (console delivery)"
        );
        Ok(())
    }
}

/// Kanban column of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Not started
    Todo,
    /// Being worked on
    InProgress,
    /// Finished
    Done,
}

/// One planned onboarding task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingTask {
    /// Task id
    pub id: String,
    /// What to do
    pub title: String,
    /// Due date
    pub due: NaiveDate,
    /// Who helps, if anyone
    pub assignee: Option<String>,
    /// Kanban column
    pub status: TaskStatus,
}

/// Template step: title, days after the start date, whether the mentor owns it.
const TEMPLATE: &[(&str, u64, bool)] = &[
    ("Sign employment contract", 0, false),
    ("Set up workstation and accounts", 0, false),
    ("Meet your mentor", 1, true),
    ("Complete security awareness training", 5, false),
    ("Read the team handbook", 5, false),
    ("First-week check-in", 7, true),
    ("30-day onboarding survey", 30, false),
];

#[derive(Default)]
struct StoreState {
    employees: HashMap<String, EmployeeProfile>,
    tasks: HashMap<String, Vec<OnboardingTask>>,
}

/// In-memory onboarding store.
///
/// Serves as employee directory, task planner and progress board.
#[derive(Default)]
pub struct InMemoryOnboardingStore {
    state: Mutex<StoreState>,
}

impl std::fmt::Debug for InMemoryOnboardingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("InMemoryOnboardingStore")
            .field("employees", &state.employees.len())
            .field("plans", &state.tasks.len())
            .finish()
    }
}

impl InMemoryOnboardingStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace an employee profile.
    #[must_use]
    pub fn with_employee(self, profile: EmployeeProfile) -> Self {
        self.add_employee(profile);
        self
    }

    /// Add or replace an employee profile.
    pub fn add_employee(&self, profile: EmployeeProfile) {
        self.lock().employees.insert(profile.id.clone(), profile);
    }

    /// Tasks planned for `employee_id`, in template order.
    #[must_use]
    pub fn tasks(&self, employee_id: &str) -> Vec<OnboardingTask> {
        self.lock().tasks.get(employee_id).cloned().unwrap_or_default()
    }

    /// Move a task to another kanban column.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::NotFound`] if the task does not exist.
    pub fn set_status(
        &self,
        employee_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<(), CapabilityError> {
        let mut state = self.lock();
        let task = state
            .tasks
            .get_mut(employee_id)
            .and_then(|tasks| tasks.iter_mut().find(|task| task.id == task_id))
            .ok_or_else(|| CapabilityError::NotFound {
                kind: "task",
                id: task_id.to_string(),
            })?;
        task.status = status;
        Ok(())
    }
}

#[async_trait]
impl EmployeeDirectory for InMemoryOnboardingStore {
    async fn profile(&self, employee_id: &str) -> Result<EmployeeProfile, CapabilityError> {
        self.lock()
            .employees
            .get(employee_id)
            .cloned()
            .ok_or_else(|| CapabilityError::NotFound {
                kind: "employee",
                id: employee_id.to_string(),
            })
    }
}

#[async_trait]
impl TaskPlanner for InMemoryOnboardingStore {
    async fn create_onboarding_tasks(
        &self,
        request: &OnboardingTasksRequest,
    ) -> Result<Vec<String>, CapabilityError> {
        let mut state = self.lock();
        if state.tasks.contains_key(&request.employee_id) {
            return Err(CapabilityError::Rejected(format!(
                "onboarding tasks already exist for employee '{}'",
                request.employee_id
            )));
        }

        let mut tasks = Vec::with_capacity(TEMPLATE.len());
        for &(title, offset, needs_mentor) in TEMPLATE {
            if needs_mentor && request.mentor_id.is_none() {
                continue;
            }
            let due = request
                .start_date
                .checked_add_days(Days::new(offset))
                .ok_or_else(|| CapabilityError::Rejected("start_date out of range".to_string()))?;
            tasks.push(OnboardingTask {
                id: uuid::Uuid::new_v4().to_string(),
                title: title.to_string(),
                due,
                assignee: needs_mentor.then(|| request.mentor_id.clone()).flatten(),
                status: TaskStatus::Todo,
            });
        }

        let ids: Vec<String> = tasks.iter().map(|task| task.id.clone()).collect();
        info!(
            employee_id = %request.employee_id,
            start_date = %request.start_date,
            created = ids.len(),
            "Onboarding tasks planned"
        );
        state.tasks.insert(request.employee_id.clone(), tasks);
        Ok(ids)
    }
}

#[async_trait]
impl ProgressBoard for InMemoryOnboardingStore {
    async fn kanban_progress(&self, employee_id: &str) -> Result<KanbanProgress, CapabilityError> {
        let state = self.lock();
        let tasks = state
            .tasks
            .get(employee_id)
            .ok_or_else(|| CapabilityError::NotFound {
                kind: "onboarding plan",
                id: employee_id.to_string(),
            })?;

        let mut progress = KanbanProgress::default();
        for task in tasks {
            match task.status {
                TaskStatus::Todo => progress.todo += 1,
                TaskStatus::InProgress => progress.in_progress += 1,
                TaskStatus::Done => progress.done += 1,
            }
        }
        Ok(progress)
    }
}
