//! The onboarding service attached to its queue.

use crate::callers::{
    EmployeeServiceClient, MailServiceClient, RemoteEmployeeDirectory, RemoteMailer,
};
use crate::capabilities::{EmployeeDirectory, Mailer, ProgressBoard, TaskPlanner};
use crate::config::RpcConfig;
use crate::handlers::{self, Capabilities};
use onboarding_rpc_core::broker::{BrokerError, MessageBroker};
use onboarding_rpc_runtime::RpcNode;
use std::sync::Arc;
use std::time::Duration;

/// A capability fulfilled in-process or by a sibling service over the broker.
pub enum Backend<T: ?Sized> {
    /// Answered locally
    Local(Arc<T>),
    /// Answered by the sibling service's queue
    Remote,
}

/// What the node's handlers run against.
pub struct Backends {
    /// Behind `send_mail`
    pub mailer: Backend<dyn Mailer>,
    /// Behind `get_employee_profile`
    pub directory: Backend<dyn EmployeeDirectory>,
    /// Behind `create_onboarding_tasks`
    pub planner: Arc<dyn TaskPlanner>,
    /// Behind `count_kanban_progress`
    pub board: Arc<dyn ProgressBoard>,
}

/// Running onboarding service.
#[derive(Debug)]
pub struct OnboardingNode {
    node: RpcNode,
    employees: EmployeeServiceClient,
    mail: MailServiceClient,
    call_timeout: Duration,
}

impl OnboardingNode {
    /// Attach to `config.service_queue` and start answering requests.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the service queue cannot be consumed.
    pub async fn start(
        broker: Arc<dyn MessageBroker>,
        config: &RpcConfig,
        backends: Backends,
    ) -> Result<Self, BrokerError> {
        let call_timeout = config.call_timeout();
        let employee_queue = config.employee_service_queue.clone();
        let mail_queue = config.mail_service_queue.clone();

        let node = RpcNode::start_with(
            broker,
            config.service_queue.as_str(),
            config.dispatch_buffer,
            |client| {
                let employees = EmployeeServiceClient::new(client.clone(), employee_queue);
                let mail = MailServiceClient::new(client, mail_queue);

                let mailer: Arc<dyn Mailer> = match backends.mailer {
                    Backend::Local(mailer) => mailer,
                    Backend::Remote => Arc::new(RemoteMailer::new(mail, call_timeout)),
                };
                let directory: Arc<dyn EmployeeDirectory> = match backends.directory {
                    Backend::Local(directory) => directory,
                    Backend::Remote => {
                        Arc::new(RemoteEmployeeDirectory::new(employees, call_timeout))
                    }
                };

                handlers::dispatch_table(&Capabilities {
                    mailer,
                    directory,
                    planner: backends.planner,
                    board: backends.board,
                })
            },
        )
        .await?;

        let client = node.client();
        Ok(Self {
            employees: EmployeeServiceClient::new(
                client.clone(),
                config.employee_service_queue.as_str(),
            ),
            mail: MailServiceClient::new(client, config.mail_service_queue.as_str()),
            node,
            call_timeout,
        })
    }

    /// Queue this service consumes.
    #[must_use]
    pub fn queue(&self) -> &str {
        self.node.queue()
    }

    /// Caller for the employee directory service.
    #[must_use]
    pub const fn employees(&self) -> &EmployeeServiceClient {
        &self.employees
    }

    /// Caller for the mail service.
    #[must_use]
    pub const fn mail(&self) -> &MailServiceClient {
        &self.mail
    }

    /// Configured bound for outgoing calls.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Number of outgoing calls waiting for a reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.node.pending_calls()
    }

    /// Stop consuming and drain queued publishes for at most `grace`.
    pub async fn shutdown(self, grace: Duration) {
        let Self {
            node,
            employees,
            mail,
            ..
        } = self;
        drop(employees);
        drop(mail);
        node.shutdown(grace).await;
    }
}
