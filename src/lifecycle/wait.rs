use crate::directory::resolve;
use crate::error::{ProcError, Result};
use crate::handle::ProcessHandle;
use crate::types::{Access, Pid, ProcessQuery};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default interval between directory polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared shutdown flag observed by wait loops
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every wait using this token return promptly
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Settings and collaborators for blocking waits
pub struct WaitContext<'a> {
    cancel: CancelToken,
    poll_interval: Duration,
    pump: Option<Box<dyn FnMut() + 'a>>,
}

impl<'a> WaitContext<'a> {
    pub fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            pump: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Host event pump invoked between polls. It must not block.
    pub fn with_pump(mut self, pump: impl FnMut() + 'a) -> Self {
        self.pump = Some(Box::new(pump));
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            tracing::debug!("Wait cancelled");
            return Err(ProcError::Cancelled);
        }
        Ok(())
    }

    fn pump(&mut self) {
        if let Some(pump) = self.pump.as_mut() {
            pump();
        }
    }

    /// Drains host events, then sleeps for `duration`
    fn idle(&mut self, duration: Duration) {
        self.pump();
        if !self.cancel.is_cancelled() {
            thread::sleep(duration);
        }
    }
}

impl Default for WaitContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitContext")
            .field("cancel", &self.cancel)
            .field("poll_interval", &self.poll_interval)
            .field("pump", &self.pump.is_some())
            .finish()
    }
}

/// Converts a millisecond timeout; negative means wait forever
pub fn timeout_from_millis(ms: i64) -> Option<Duration> {
    u64::try_from(ms).ok().map(Duration::from_millis)
}

struct Deadline {
    start: Instant,
    timeout: Option<Duration>,
}

impl Deadline {
    fn start(timeout: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    fn expired(&self) -> bool {
        match self.timeout {
            Some(timeout) => self.start.elapsed() >= timeout,
            None => false,
        }
    }

    /// Next sleep: one tick, capped by the time left
    fn slice(&self, tick: Duration) -> Duration {
        match self.timeout {
            Some(timeout) => tick.min(timeout.saturating_sub(self.start.elapsed())),
            None => tick,
        }
    }

    fn timeout_error(&self) -> ProcError {
        ProcError::Timeout(self.timeout.map(|t| t.as_millis() as u64).unwrap_or(0))
    }
}

/// Polls the directory until a process matching `name` appears.
///
/// A zero timeout is a single check.
pub fn wait_for_appearance(
    name: &str,
    timeout: Option<Duration>,
    ctx: &mut WaitContext<'_>,
) -> Result<Pid> {
    let query = ProcessQuery::parse(name)?;
    let deadline = Deadline::start(timeout);

    loop {
        ctx.check_cancelled()?;

        if let Some(pid) = resolve(&query)? {
            return Ok(pid);
        }

        if deadline.expired() {
            tracing::debug!("Timed out waiting for '{}' to appear", name);
            return Err(deadline.timeout_error());
        }

        ctx.idle(deadline.slice(ctx.poll_interval));
    }
}

/// Waits until no process matches `query`. Returns false on timeout.
///
/// While a match exists its exit signal is waited on directly, so an exit
/// is noticed without waiting for the next poll tick.
pub fn wait_for_exit(
    query: &ProcessQuery,
    timeout: Option<Duration>,
    ctx: &mut WaitContext<'_>,
) -> Result<bool> {
    let deadline = Deadline::start(timeout);

    loop {
        ctx.check_cancelled()?;

        let Some(pid) = resolve(query)? else {
            return Ok(true);
        };

        if deadline.expired() {
            tracing::debug!("Timed out waiting for '{}' to exit", query);
            return Ok(false);
        }

        let slice = deadline.slice(ctx.poll_interval);
        match ProcessHandle::open(pid, Access::Synchronize) {
            Ok(mut handle) => {
                if handle.wait_timeout(slice).is_err() {
                    thread::sleep(slice);
                }
                ctx.pump();
            }
            Err(_) => ctx.idle(slice),
        }
    }
}

/// Waits on the exit signal of an owned handle. Returns false on timeout.
pub fn wait_for_handle_exit(
    handle: &mut ProcessHandle,
    timeout: Option<Duration>,
    ctx: &mut WaitContext<'_>,
) -> Result<bool> {
    let deadline = Deadline::start(timeout);

    loop {
        ctx.check_cancelled()?;

        if handle.wait_timeout(deadline.slice(ctx.poll_interval))? {
            return Ok(true);
        }

        if deadline.expired() {
            tracing::debug!("Timed out waiting for process {} to exit", handle.pid());
            return Ok(false);
        }

        ctx.pump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::resolve_all;
    use crate::lifecycle::create::create;
    use crate::testutil;
    use crate::types::CreateOptions;
    use std::cell::Cell;

    #[test]
    fn test_timeout_from_millis() {
        assert_eq!(timeout_from_millis(-1), None);
        assert_eq!(timeout_from_millis(0), Some(Duration::ZERO));
        assert_eq!(timeout_from_millis(250), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_appearance_of_self_is_immediate() {
        let mut ctx = WaitContext::new();
        let pid = std::process::id();
        let found = wait_for_appearance(&pid.to_string(), Some(Duration::ZERO), &mut ctx).unwrap();
        assert_eq!(found, pid);
    }

    #[test]
    fn test_appearance_zero_timeout_is_single_check() {
        let mut ctx = WaitContext::new();
        let start = Instant::now();
        let result = wait_for_appearance("no-such-process.exe", Some(Duration::ZERO), &mut ctx);
        assert!(matches!(result, Err(ProcError::Timeout(0))));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_appearance_times_out() {
        let pumped = Cell::new(0);
        let mut ctx = WaitContext::new()
            .with_poll_interval(Duration::from_millis(20))
            .with_pump(|| pumped.set(pumped.get() + 1));
        let start = Instant::now();
        let result = wait_for_appearance(
            "no-such-process.exe",
            Some(Duration::from_millis(150)),
            &mut ctx,
        );
        assert!(matches!(result, Err(ProcError::Timeout(150))));
        assert!(start.elapsed() >= Duration::from_millis(150));
        drop(ctx);
        assert!(pumped.get() > 0);
    }

    #[test]
    fn test_infinite_wait_ends_on_cancel() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let mut polls = 0;
        let mut ctx = WaitContext::new()
            .with_cancel(cancel)
            .with_poll_interval(Duration::from_millis(5))
            .with_pump(move || {
                polls += 1;
                if polls == 3 {
                    trigger.cancel();
                }
            });
        let result = wait_for_appearance("no-such-process.exe", None, &mut ctx);
        assert!(matches!(result, Err(ProcError::Cancelled)));
    }

    #[test]
    fn test_exit_of_missing_process() {
        let mut ctx = WaitContext::new();
        let query = ProcessQuery::Pid(u32::MAX - 1);
        assert!(wait_for_exit(&query, Some(Duration::ZERO), &mut ctx).unwrap());
    }

    #[test]
    fn test_exit_of_self_times_out() {
        let mut ctx = WaitContext::new().with_poll_interval(Duration::from_millis(10));
        let query = ProcessQuery::Pid(std::process::id());
        let start = Instant::now();
        assert!(!wait_for_exit(&query, Some(Duration::from_millis(100)), &mut ctx).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_handle_wait_sees_exit() {
        let mut spawned = create(testutil::long_running_command(), &CreateOptions::new())
            .expect("Failed to create process");
        let mut ctx = WaitContext::new();

        assert!(!wait_for_handle_exit(&mut spawned.handle, Some(Duration::from_millis(50)), &mut ctx).unwrap());

        spawned.handle.terminate(1).unwrap();
        assert!(wait_for_handle_exit(&mut spawned.handle, Some(Duration::from_secs(10)), &mut ctx).unwrap());
    }

    #[test]
    fn test_appearance_of_created_child() {
        let spawned = create(testutil::long_running_command(), &CreateOptions::new())
            .expect("Failed to create process");
        let mut ctx = WaitContext::new();

        // 同名の別プロセスが先に見つかることもある
        let found = wait_for_appearance(testutil::long_running_name(), Some(Duration::from_secs(10)), &mut ctx);
        assert!(found.is_ok());
        let all = resolve_all(testutil::long_running_name()).unwrap();
        assert!(all.contains(&spawned.pid), "{:?} does not contain {}", all, spawned.pid);

        spawned.handle.terminate(1).unwrap();
    }

    #[test]
    fn test_exit_by_pid_after_terminate() {
        let spawned = create(testutil::long_running_command(), &CreateOptions::new())
            .expect("Failed to create process");
        let query = ProcessQuery::Pid(spawned.pid);
        let mut ctx = WaitContext::new();

        assert!(!wait_for_exit(&query, Some(Duration::ZERO), &mut ctx).unwrap());
        spawned.handle.terminate(1).unwrap();
        assert!(wait_for_exit(&query, Some(Duration::from_secs(10)), &mut ctx).unwrap());
    }
}
