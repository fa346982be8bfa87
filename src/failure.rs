//! Operating modes and the failure propagation policy
//!
//! Interactive (single-shot) runs terminate on the first unrecoverable failure with the
//! category's exit code. Unattended server runs log the failure and hand it back, so the
//! surrounding orchestration can drop the one work item and keep going.

use serde::Deserialize;
use tracing::error;

use crate::error::BootstrapError;
use crate::workspace::LiveWorkspaces;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    #[default]
    Interactive,
    Server,
}

#[derive(Debug, Clone, Copy)]
pub struct FailurePolicy {
    mode: OperatingMode,
}

impl FailurePolicy {
    pub fn new(mode: OperatingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Whether a fatal service error may end the process from deep inside a transaction.
    pub fn allows_termination(&self) -> bool {
        self.mode == OperatingMode::Interactive
    }

    /// Handle a failure of one work item.
    ///
    /// Always-fatal errors (configuration, access policy) terminate in every mode. Anything
    /// else terminates in interactive mode and is returned to the caller in server mode.
    pub fn escalate(&self, err: BootstrapError) -> BootstrapError {
        if err.is_always_fatal() || self.allows_termination() {
            self.fatal(err)
        }
        error!(exit_code = err.exit_code(), "{}", err);
        err
    }

    /// Log the error, print it on the console and exit with its category's code.
    ///
    /// Destructors do not run past this point, so live temporary workspaces are removed
    /// first.
    pub fn fatal(&self, err: BootstrapError) -> ! {
        let code = err.exit_code();
        error!(exit_code = code, "{}", err);
        eprintln!("{}", err);
        LiveWorkspaces::global().remove_all();
        std::process::exit(code)
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::new(OperatingMode::default())
    }
}
