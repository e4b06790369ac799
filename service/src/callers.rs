//! Typed callers for the sibling services.
//!
//! Each caller wraps the generic [`RpcClient`] with one service's destination
//! queue and operation schemas. Every method takes its timeout explicitly.

use crate::capabilities::{CapabilityError, EmployeeDirectory, Mailer};
use async_trait::async_trait;
use onboarding_rpc_core::operations::{
    EmployeeProfile, FIND_EMPLOYEE_BY_ID, MailMessage, MailReceipt, ProfileLookup, SEND_MAIL,
};
use onboarding_rpc_runtime::{CallError, RpcClient};
use std::time::Duration;

/// Caller for the employee directory service.
#[derive(Clone, Debug)]
pub struct EmployeeServiceClient {
    client: RpcClient,
    destination: String,
}

impl EmployeeServiceClient {
    /// Create a caller targeting `destination`.
    #[must_use]
    pub fn new(client: RpcClient, destination: impl Into<String>) -> Self {
        Self {
            client,
            destination: destination.into(),
        }
    }

    /// Queue requests are sent to.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Look up an employee by id.
    ///
    /// # Errors
    ///
    /// - [`CallError::Timeout`] if the directory does not answer within `timeout`
    /// - [`CallError::Remote`] if the directory reports an error
    /// - [`CallError::Decode`] if the reply is not an employee profile
    pub async fn find_employee_by_id(
        &self,
        employee_id: &str,
        timeout: Duration,
    ) -> Result<EmployeeProfile, CallError> {
        let lookup = ProfileLookup {
            employee_id: employee_id.to_string(),
        };
        self.client
            .call_typed(&self.destination, FIND_EMPLOYEE_BY_ID, lookup, timeout)
            .await
    }
}

/// Caller for the mail service.
#[derive(Clone, Debug)]
pub struct MailServiceClient {
    client: RpcClient,
    destination: String,
}

impl MailServiceClient {
    /// Create a caller targeting `destination`.
    #[must_use]
    pub fn new(client: RpcClient, destination: impl Into<String>) -> Self {
        Self {
            client,
            destination: destination.into(),
        }
    }

    /// Queue requests are sent to.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Ask the mail service to deliver `message`.
    ///
    /// # Errors
    ///
    /// - [`CallError::Timeout`] if the mail service does not answer within `timeout`
    /// - [`CallError::Remote`] if the mail service reports an error
    /// - [`CallError::Decode`] if the reply carries no `status`
    pub async fn send_mail(
        &self,
        message: &MailMessage,
        timeout: Duration,
    ) -> Result<MailReceipt, CallError> {
        self.client
            .call_typed(&self.destination, SEND_MAIL, message.clone(), timeout)
            .await
    }
}

impl From<CallError> for CapabilityError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Remote(message) => Self::Rejected(message),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// [`EmployeeDirectory`] answered by the employee directory service.
#[derive(Clone, Debug)]
pub struct RemoteEmployeeDirectory {
    employees: EmployeeServiceClient,
    timeout: Duration,
}

impl RemoteEmployeeDirectory {
    /// Look profiles up through `employees`, waiting at most `timeout` per call.
    #[must_use]
    pub const fn new(employees: EmployeeServiceClient, timeout: Duration) -> Self {
        Self { employees, timeout }
    }
}

#[async_trait]
impl EmployeeDirectory for RemoteEmployeeDirectory {
    async fn profile(&self, employee_id: &str) -> Result<EmployeeProfile, CapabilityError> {
        Ok(self
            .employees
            .find_employee_by_id(employee_id, self.timeout)
            .await?)
    }
}

/// [`Mailer`] forwarding to the mail service.
#[derive(Clone, Debug)]
pub struct RemoteMailer {
    mail: MailServiceClient,
    timeout: Duration,
}

impl RemoteMailer {
    /// Forward mails through `mail`, waiting at most `timeout` per call.
    #[must_use]
    pub const fn new(mail: MailServiceClient, timeout: Duration) -> Self {
        Self { mail, timeout }
    }
}

#[async_trait]
impl Mailer for RemoteMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), CapabilityError> {
        let receipt = self.mail.send_mail(message, self.timeout).await?;
        tracing::debug!(to = %message.to, status = %receipt.status, "Mail forwarded");
        Ok(())
    }
}
