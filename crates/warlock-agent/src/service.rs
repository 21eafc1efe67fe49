//! `systemctl` wrapper for `service:control` requests.

use std::time::Duration;

use warlock_protocol::{CommandOutput, ServiceControlRequest};

use crate::executor::{CommandDescriptor, CommandExecutor, ExecError};

/// Deadline for one `systemctl` invocation.
pub const SERVICE_TIMEOUT: Duration = Duration::from_secs(10);

/// Actions accepted for `systemctl <action> <unit>`.
pub const ALLOWED_ACTIONS: &[&str] = &[
    "start", "stop", "restart", "status", "enable", "disable", "reload",
];

/// Errors from service control.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The action is not one of [`ALLOWED_ACTIONS`].
    #[error("Unsupported service action: {0}")]
    InvalidAction(String),

    /// The unit name is empty or contains characters outside unit-name syntax.
    #[error("Invalid service name: {0:?}")]
    InvalidService(String),

    /// Running `systemctl` failed.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Build the `systemctl` command line after validating both arguments.
///
/// # Errors
///
/// Returns [`ServiceError::InvalidAction`] or [`ServiceError::InvalidService`].
pub fn systemctl_command(service: &str, action: &str) -> Result<String, ServiceError> {
    if !ALLOWED_ACTIONS.contains(&action) {
        return Err(ServiceError::InvalidAction(action.to_owned()));
    }
    if !is_unit_name(service) {
        return Err(ServiceError::InvalidService(service.to_owned()));
    }
    Ok(format!("systemctl {action} {service}"))
}

/// Run `systemctl <action> <service>` through `executor`, bypassing the cache.
///
/// The result carries `systemctl`'s exit code; a failing unit is not an error.
///
/// # Errors
///
/// Returns a [`ServiceError`] for invalid arguments or execution failure.
pub async fn control(
    executor: &CommandExecutor,
    request: &ServiceControlRequest,
) -> Result<CommandOutput, ServiceError> {
    let command = systemctl_command(&request.service, &request.action)?;
    let output = executor
        .execute_uncached(&CommandDescriptor::new(command, SERVICE_TIMEOUT))
        .await?;
    Ok(output)
}

/// Unit-name characters that need no shell quoting: ASCII alphanumerics
/// and `:-_.@`.
fn is_unit_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_' | '.' | '@'))
}
