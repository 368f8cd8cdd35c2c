//! Bounded polling: generic conditions and growing log files.

use crate::error::{HarnessError, Result};
use crate::remote::RemoteNode;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::debug;

/// Poll `condition` every `backoff` until it returns true or `timeout` expires.
///
/// The condition is always evaluated at least once, and once more after the
/// deadline passes. Errors from the condition abort the wait immediately.
pub fn wait_until<F>(mut condition: F, timeout: Duration, backoff: Duration, err_msg: &str) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let start = Instant::now();

    loop {
        if condition()? {
            debug!("Condition met after {:?}", start.elapsed());
            return Ok(());
        }

        if start.elapsed() > timeout {
            return Err(HarnessError::timeout(err_msg));
        }

        sleep(backoff);
    }
}

/// Watches a log file on a node for text written after the monitor was created.
pub struct LogMonitor<'a, N: RemoteNode + ?Sized> {
    node: &'a N,
    path: String,
    offset: u64,
}

impl<'a, N: RemoteNode + ?Sized> LogMonitor<'a, N> {
    /// Start watching `path`; existing content is ignored.
    pub fn new(node: &'a N, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let offset = node.file_size(&path)?;
        debug!("Monitoring {} on {} from offset {}", path, node.name(), offset);
        Ok(Self { node, path, offset })
    }

    /// Byte offset the monitor started from.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Block until `pattern` appears in the new part of the log.
    pub fn wait_until(&self, pattern: &str, timeout: Duration, backoff: Duration) -> Result<()> {
        let err_msg = format!(
            "{} did not appear in {} on {} within {:?}",
            pattern,
            self.path,
            self.node.name(),
            timeout
        );
        wait_until(
            || Ok(self.node.read_from(&self.path, self.offset)?.contains(pattern)),
            timeout,
            backoff,
            &err_msg,
        )
    }
}
