//! Dispatch table for the operations this service answers.

use crate::capabilities::{EmployeeDirectory, Mailer, ProgressBoard, TaskPlanner};
use onboarding_rpc_core::operations::{
    COUNT_KANBAN_PROGRESS, CREATE_ONBOARDING_TASKS, GET_EMPLOYEE_PROFILE, KanbanProgressRequest,
    MailMessage, MailReceipt, OnboardingTasksCreated, OnboardingTasksRequest, ProfileLookup,
    SEND_MAIL,
};
use onboarding_rpc_runtime::DispatchTable;
use std::sync::Arc;

/// The collaborators behind the inbound operations.
#[derive(Clone)]
pub struct Capabilities {
    /// Fulfils `send_mail`
    pub mailer: Arc<dyn Mailer>,
    /// Fulfils `get_employee_profile`
    pub directory: Arc<dyn EmployeeDirectory>,
    /// Fulfils `create_onboarding_tasks`
    pub planner: Arc<dyn TaskPlanner>,
    /// Fulfils `count_kanban_progress`
    pub board: Arc<dyn ProgressBoard>,
}

/// Build the dispatch table answering `send_mail`, `get_employee_profile`,
/// `create_onboarding_tasks` and `count_kanban_progress`.
#[must_use]
pub fn dispatch_table(capabilities: &Capabilities) -> DispatchTable {
    let Capabilities {
        mailer,
        directory,
        planner,
        board,
    } = capabilities.clone();

    DispatchTable::new()
        .route(SEND_MAIL, move |mail: MailMessage| {
            let mailer = Arc::clone(&mailer);
            async move {
                mailer.send(&mail).await?;
                Ok::<_, crate::capabilities::CapabilityError>(MailReceipt::sent())
            }
        })
        .route(GET_EMPLOYEE_PROFILE, move |lookup: ProfileLookup| {
            let directory = Arc::clone(&directory);
            async move { directory.profile(&lookup.employee_id).await }
        })
        .route(CREATE_ONBOARDING_TASKS, move |request: OnboardingTasksRequest| {
            let planner = Arc::clone(&planner);
            async move {
                let task_ids = planner.create_onboarding_tasks(&request).await?;
                Ok::<_, crate::capabilities::CapabilityError>(OnboardingTasksCreated { task_ids })
            }
        })
        .route(COUNT_KANBAN_PROGRESS, move |request: KanbanProgressRequest| {
            let board = Arc::clone(&board);
            async move { board.kanban_progress(&request.employee_id).await }
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::capabilities::{CapabilityError, InMemoryOnboardingStore};
    use async_trait::async_trait;
    use onboarding_rpc_core::operations::EmployeeProfile;
    use onboarding_rpc_core::payload::Payload;
    use onboarding_rpc_testing::fixtures;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<MailMessage>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: &MailMessage) -> Result<(), CapabilityError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn table(mailer: Arc<RecordingMailer>) -> DispatchTable {
        let store = Arc::new(InMemoryOnboardingStore::new().with_employee(EmployeeProfile {
            id: "E-1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            department: Some("Engineering".to_string()),
            position: Some("Analyst".to_string()),
        }));
        dispatch_table(&Capabilities {
            mailer,
            directory: store.clone(),
            planner: store.clone(),
            board: store,
        })
    }

    async fn dispatch(table: &DispatchTable, operation: &str, data: Value) -> Value {
        Value::Object(table.dispatch(operation, fixtures::payload(data)).await)
    }

    #[tokio::test]
    async fn send_mail_without_to_never_reaches_mailer() {
        let mailer = Arc::new(RecordingMailer::default());
        let table = table(Arc::clone(&mailer));

        let reply = dispatch(
            &table,
            "send_mail",
            json!({ "subject": "Welcome", "body": "Hi" }),
        )
        .await;

        assert_eq!(reply, json!({ "error": "missing 'to'" }));
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_mail_reports_sent() {
        let mailer = Arc::new(RecordingMailer::default());
        let table = table(Arc::clone(&mailer));

        let reply = dispatch(
            &table,
            "send_mail",
            json!({ "to": "ada@example.com", "subject": "Welcome", "body": "Hi" }),
        )
        .await;

        assert_eq!(reply, json!({ "status": "sent" }));
        assert_eq!(mailer.sent.lock().unwrap()[0].to, "ada@example.com");
    }

    #[tokio::test]
    async fn profile_lookup_returns_fields_or_not_found() {
        let table = table(Arc::default());

        let reply =
            dispatch(&table, "get_employee_profile", json!({ "employee_id": "E-1" })).await;
        assert_eq!(
            reply,
            json!({
                "id": "E-1",
                "first_name": "Ada",
                "last_name": "Lovelace",
                "email": "ada@example.com",
                "department": "Engineering",
                "position": "Analyst"
            })
        );

        let reply =
            dispatch(&table, "get_employee_profile", json!({ "employee_id": "E-2" })).await;
        assert_eq!(reply, json!({ "error": "employee 'E-2' not found" }));
    }

    #[tokio::test]
    async fn tasks_then_progress() {
        let table = table(Arc::default());

        let reply = dispatch(
            &table,
            "create_onboarding_tasks",
            json!({ "employee_id": "E-1", "start_date": "2026-03-02", "mentor_id": "M-1" }),
        )
        .await;
        assert_eq!(reply["created"], json!(7));
        assert_eq!(reply["task_ids"].as_array().unwrap().len(), 7);

        let reply = dispatch(
            &table,
            "count_kanban_progress",
            json!({ "employee_id": "E-1" }),
        )
        .await;
        assert_eq!(reply, json!({ "todo": 7, "in_progress": 0, "done": 0, "total": 7 }));
    }

    #[tokio::test]
    async fn bad_start_date_is_reported_as_missing() {
        let table = table(Arc::default());

        let reply = dispatch(
            &table,
            "create_onboarding_tasks",
            json!({ "employee_id": "E-1", "start_date": "next monday" }),
        )
        .await;

        assert_eq!(reply, json!({ "error": "missing 'start_date'" }));
    }

    #[tokio::test]
    async fn unknown_operation_is_reported() {
        let table = table(Arc::default());
        let reply = table.dispatch("does_not_exist", Payload::new()).await;
        assert_eq!(Value::Object(reply), json!({ "error": "unknown message type" }));
    }
}
