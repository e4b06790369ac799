//! # Onboarding Service
//!
//! HR onboarding service speaking the broker request/reply protocol.
//!
//! Answers on its own queue:
//! - `send_mail`: deliver a mail (console or forwarded to the mail service)
//! - `get_employee_profile`: profile lookup (local or via the employee service)
//! - `create_onboarding_tasks`: plan a new hire's onboarding tasks
//! - `count_kanban_progress`: task counts per kanban column
//!
//! Calls out through typed callers:
//! - [`EmployeeServiceClient::find_employee_by_id`]
//! - [`MailServiceClient::send_mail`]

pub mod callers;
pub mod capabilities;
pub mod config;
pub mod handlers;
pub mod node;

pub use callers::{EmployeeServiceClient, MailServiceClient, RemoteEmployeeDirectory, RemoteMailer};
pub use capabilities::{
    CapabilityError, ConsoleMailer, EmployeeDirectory, InMemoryOnboardingStore, Mailer,
    ProgressBoard, TaskPlanner,
};
pub use config::{ConfigError, MailBackend, ServiceConfig};
pub use handlers::{Capabilities, dispatch_table};
pub use node::{Backend, Backends, OnboardingNode};
