// pgdata-restorer/src/restore/service.rs
use crate::config::{ServiceConfig, ServiceManager};
use crate::errors::CommandError;
use crate::utils::process::{CommandRunner, run_checked};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Stop,
    Start,
}

impl ServiceAction {
    fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Stop => "stop",
            ServiceAction::Start => "start",
        }
    }
}

/// Program and arguments for `action` under the configured service manager.
fn service_command(service: &ServiceConfig, action: ServiceAction) -> (&'static str, [&str; 2]) {
    match service.manager {
        ServiceManager::Service => ("service", [service.name.as_str(), action.as_str()]),
        ServiceManager::Systemctl => ("systemctl", [action.as_str(), service.name.as_str()]),
    }
}

fn control(
    runner: &dyn CommandRunner,
    service: &ServiceConfig,
    action: ServiceAction,
) -> Result<(), CommandError> {
    let (program, args) = service_command(service, action);
    log::info!("[Restore] Running {} {} {}", program, args[0], args[1]);
    run_checked(runner, program, &args)?;
    Ok(())
}

pub fn stop_service(runner: &dyn CommandRunner, service: &ServiceConfig) -> Result<(), CommandError> {
    control(runner, service, ServiceAction::Stop)
}

/// Returns as soon as the service manager does; the server may still be recovering.
pub fn start_service(runner: &dyn CommandRunner, service: &ServiceConfig) -> Result<(), CommandError> {
    control(runner, service, ServiceAction::Start)
}
