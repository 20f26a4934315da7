//! SSH reconnect handler: the outer loop around an interactive session
//! that tears tunneled transports down between attempts.

use anyhow::Result;
use tracing::warn;

use crate::application::ports::{
    EXIT_DISCONNECT, ReconnectOracle, SshEndpoint, SshTransport,
};

/// Cleanup hook run before each retry. Failures are logged and never abort
/// the retry.
pub type CleanupHook<'a> = Box<dyn FnMut() -> Result<()> + 'a>;

/// Outer control loop around one interactive transport call.
///
/// Contract: a normal exit or a user interrupt returns immediately; a
/// disconnect consults the oracle; the cleanup hook runs exactly once per
/// retry, strictly before that retry's transport invocation, and never
/// before the first attempt.
pub struct ReconnectHandler<'a, S, O> {
    ssh: &'a S,
    oracle: &'a O,
    max_retries: u32,
    cleanup: Option<CleanupHook<'a>>,
}

impl<'a, S: SshTransport, O: ReconnectOracle> ReconnectHandler<'a, S, O> {
    #[must_use]
    pub fn new(ssh: &'a S, oracle: &'a O, max_retries: u32) -> Self {
        Self {
            ssh,
            oracle,
            max_retries,
            cleanup: None,
        }
    }

    #[must_use]
    pub fn with_cleanup(mut self, cleanup: CleanupHook<'a>) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    /// Connect, retrying disconnects while the oracle agrees and retries
    /// remain. Returns the final transport exit code.
    ///
    /// # Errors
    ///
    /// Returns an error only when the transport itself cannot be invoked.
    pub async fn connect(
        &mut self,
        vm_name: &str,
        endpoint: &SshEndpoint,
        command: Option<&str>,
        multiplexer: Option<&str>,
    ) -> Result<i32> {
        let mut retries_used: u32 = 0;
        loop {
            let exit_code = self.ssh.interactive(endpoint, command, multiplexer).await?;
            if exit_code != EXIT_DISCONNECT {
                // Normal exit or user interrupt: done, no cleanup.
                return Ok(exit_code);
            }
            if !self.oracle.should_retry(vm_name, retries_used + 1) {
                // Declined: return the disconnect code without cleanup.
                return Ok(exit_code);
            }
            if retries_used >= self.max_retries {
                return Ok(exit_code);
            }
            retries_used += 1;
            if let Some(cleanup) = self.cleanup.as_mut() {
                if let Err(e) = cleanup() {
                    warn!(vm = vm_name, error = %e, "reconnect cleanup hook failed");
                }
            }
        }
    }
}
