//! Polling reactor that multiplexes socket readiness across suspended tasks.
//!
//! Tasks call [`SocketPool::suspend`] to wait until a socket is readable or
//! writable. A single [`SocketPool::run`] loop gathers every registered
//! interest into one `poll(2)` call and resumes exactly the tasks whose
//! sockets became ready.
//!
//! ## Cancellation
//!
//! Dropping a suspend future (aborting its task, losing a `select!`)
//! deregisters the interest immediately. Dropping or failing the `run()`
//! future resolves every outstanding waiter with [`ReactorError::Cancelled`].
//! New registrations are only observed at the next poll cycle, so the
//! configured [`Interval`] bounds how stale the watched set can be.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use libc::{c_int, c_short};
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::socket::Socket;

/// Errors surfaced by the reactor.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// `run()` was called while another `run()` is active on the same pool.
    #[error("socket pool is already running")]
    AlreadyRunning,

    /// Another task is already waiting on this socket in this direction.
    #[error("a task is already suspended on fd {fd} for {direction}")]
    AlreadySuspended { fd: RawFd, direction: Direction },

    /// The pool stopped before the socket became ready.
    #[error("suspension cancelled")]
    Cancelled,

    #[error("fd {fd} is not a valid descriptor")]
    InvalidSocket { fd: RawFd },

    /// The poll syscall itself failed; the loop has stopped.
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),
}

/// The readiness a task waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn events(self) -> c_short {
        match self {
            Self::Read => libc::POLLIN,
            Self::Write => libc::POLLOUT,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// Maximum time one poll cycle may block.
///
/// # Examples
///
/// ```
/// use pollhttp::reactor::Interval;
///
/// assert_eq!(Interval::immediate().milliseconds(), 0);
/// assert_eq!(Interval::seconds(1).milliseconds(), 1000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "u32")]
pub enum Interval {
    /// Busy-poll: never block.
    Immediate,
    Milliseconds(u32),
}

impl Interval {
    /// An interval that never blocks.
    pub const fn immediate() -> Self {
        Self::Immediate
    }

    /// An interval of `ms` milliseconds; `0` is [`Interval::Immediate`].
    pub const fn from_millis(ms: u32) -> Self {
        if ms == 0 {
            Self::Immediate
        } else {
            Self::Milliseconds(ms)
        }
    }

    /// An interval of whole seconds, saturating on overflow.
    pub const fn seconds(seconds: u32) -> Self {
        Self::from_millis(seconds.saturating_mul(1000))
    }

    /// The wait per cycle in milliseconds.
    pub const fn milliseconds(self) -> u32 {
        match self {
            Self::Immediate => 0,
            Self::Milliseconds(ms) => ms,
        }
    }

    pub const fn as_duration(self) -> Duration {
        Duration::from_millis(self.milliseconds() as u64)
    }

    fn poll_timeout(self) -> c_int {
        c_int::try_from(self.milliseconds()).unwrap_or(c_int::MAX)
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::Milliseconds(10)
    }
}

impl From<u32> for Interval {
    fn from(ms: u32) -> Self {
        Self::from_millis(ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Interest {
    fd: RawFd,
    direction: Direction,
}

type Resume = oneshot::Sender<Result<(), ReactorError>>;

struct Waiter {
    id: u64,
    resume: Resume,
}

#[derive(Default)]
struct PoolState {
    running: bool,
    waiters: HashMap<Interest, Waiter>,
}

struct Shared {
    interval: Interval,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
}

/// Waiter ids captured for one descriptor when the poll set was built.
#[derive(Default, Clone, Copy)]
struct Watched {
    read: Option<u64>,
    write: Option<u64>,
}

/// A readiness reactor shared by every task doing socket I/O.
///
/// Cloning is cheap; all clones drive and observe the same interest set.
///
/// # Examples
///
/// ```rust,no_run
/// use pollhttp::reactor::{Direction, SocketPool};
/// use pollhttp::socket::Socket;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = SocketPool::new();
/// tokio::spawn({
///     let pool = pool.clone();
///     async move { pool.run().await }
/// });
///
/// let (left, right) = Socket::make_non_blocking_pair()?;
/// left.write(b"ping", 0)?;
/// pool.suspend(&right, Direction::Read).await?;
/// assert_eq!(right.read_byte()?, b'p');
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SocketPool {
    shared: Arc<Shared>,
}

impl SocketPool {
    /// Creates a pool polling every 10 ms.
    pub fn new() -> Self {
        Self::with_interval(Interval::default())
    }

    /// Creates a pool whose poll cycles block for at most `interval`.
    pub fn with_interval(interval: Interval) -> Self {
        Self {
            shared: Arc::new(Shared {
                interval,
                state: Mutex::new(PoolState::default()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// The configured poll interval.
    pub fn interval(&self) -> Interval {
        self.shared.interval
    }

    /// Returns `true` while a `run()` loop is active.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Number of tasks currently suspended on this pool.
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// Suspends the calling task until `socket` is ready for `direction`.
    ///
    /// # Errors
    ///
    /// - [`ReactorError::AlreadySuspended`] immediately if another task is
    ///   waiting on the same socket and direction.
    /// - [`ReactorError::InvalidSocket`] for a closed socket, or when the
    ///   poll loop reports the descriptor as invalid.
    /// - [`ReactorError::Cancelled`] if the pool is torn down first.
    pub async fn suspend(&self, socket: &Socket, direction: Direction) -> Result<(), ReactorError> {
        let interest = Interest {
            fd: socket.raw_fd(),
            direction,
        };
        let (id, resumed) = self.register(interest)?;
        let _registration = Registration {
            shared: &self.shared,
            interest,
            id,
        };

        match resumed.await {
            Ok(result) => result,
            Err(_) => Err(ReactorError::Cancelled),
        }
    }

    fn register(
        &self,
        interest: Interest,
    ) -> Result<(u64, oneshot::Receiver<Result<(), ReactorError>>), ReactorError> {
        if interest.fd < 0 {
            return Err(ReactorError::InvalidSocket { fd: interest.fd });
        }

        let mut state = self.shared.state.lock();
        if state.waiters.contains_key(&interest) {
            return Err(ReactorError::AlreadySuspended {
                fd: interest.fd,
                direction: interest.direction,
            });
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (resume, resumed) = oneshot::channel();
        state.waiters.insert(interest, Waiter { id, resume });
        trace!(fd = interest.fd, direction = %interest.direction, "task suspended");
        Ok((id, resumed))
    }

    /// Drives the poll loop until it fails or the future is dropped.
    ///
    /// Only one `run()` may be active per pool; a second concurrent call
    /// returns [`ReactorError::AlreadyRunning`] and leaves the first alone.
    /// On exit every outstanding waiter is resumed with
    /// [`ReactorError::Cancelled`].
    pub async fn run(&self) -> Result<(), ReactorError> {
        {
            let mut state = self.shared.state.lock();
            if state.running {
                return Err(ReactorError::AlreadyRunning);
            }
            state.running = true;
        }
        let _teardown = Teardown {
            shared: &self.shared,
        };
        debug!(
            interval_ms = self.shared.interval.milliseconds(),
            "socket pool running"
        );

        let timeout = self.shared.interval.poll_timeout();
        loop {
            let (fds, watched) = self.snapshot();
            trace!(descriptors = fds.len(), "polling");

            let (fds, outcome) = tokio::task::spawn_blocking(move || poll_descriptors(fds, timeout))
                .await
                .map_err(|e| ReactorError::Poll(io::Error::other(e)))?;

            match outcome {
                Ok(0) => {}
                Ok(_) => self.dispatch(&fds, &watched),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!(error = %e, "poll failed; stopping socket pool");
                    return Err(ReactorError::Poll(e));
                }
            }

            tokio::task::yield_now().await;
        }
    }

    // Builds one pollfd per descriptor, merging read and write interest.
    fn snapshot(&self) -> (Vec<libc::pollfd>, Vec<Watched>) {
        let mut state = self.shared.state.lock();
        state.waiters.retain(|_, waiter| !waiter.resume.is_closed());

        let mut index: HashMap<RawFd, usize> = HashMap::with_capacity(state.waiters.len());
        let mut fds = Vec::with_capacity(state.waiters.len());
        let mut watched: Vec<Watched> = Vec::with_capacity(state.waiters.len());

        for (interest, waiter) in &state.waiters {
            let slot = *index.entry(interest.fd).or_insert_with(|| {
                fds.push(libc::pollfd {
                    fd: interest.fd,
                    events: 0,
                    revents: 0,
                });
                watched.push(Watched::default());
                fds.len() - 1
            });
            fds[slot].events |= interest.direction.events();
            match interest.direction {
                Direction::Read => watched[slot].read = Some(waiter.id),
                Direction::Write => watched[slot].write = Some(waiter.id),
            }
        }
        (fds, watched)
    }

    fn dispatch(&self, fds: &[libc::pollfd], watched: &[Watched]) {
        let mut state = self.shared.state.lock();
        for (pollfd, watched) in fds.iter().zip(watched) {
            let revents = pollfd.revents;
            if revents == 0 {
                continue;
            }
            let fd = pollfd.fd;

            if revents & libc::POLLNVAL != 0 {
                warn!(fd, "descriptor is not open; failing its waiters");
                let pending = [
                    take_waiter(&mut state.waiters, fd, Direction::Read, watched.read),
                    take_waiter(&mut state.waiters, fd, Direction::Write, watched.write),
                ];
                for waiter in pending.into_iter().flatten() {
                    let _ = waiter.resume.send(Err(ReactorError::InvalidSocket { fd }));
                }
                continue;
            }

            // Hang-ups and errors wake both directions so the next I/O call sees them.
            let failed = revents & (libc::POLLHUP | libc::POLLERR) != 0;
            if failed || revents & libc::POLLIN != 0 {
                if let Some(waiter) =
                    take_waiter(&mut state.waiters, fd, Direction::Read, watched.read)
                {
                    trace!(fd, "readable");
                    let _ = waiter.resume.send(Ok(()));
                }
            }
            if failed || revents & libc::POLLOUT != 0 {
                if let Some(waiter) =
                    take_waiter(&mut state.waiters, fd, Direction::Write, watched.write)
                {
                    trace!(fd, "writable");
                    let _ = waiter.resume.send(Ok(()));
                }
            }
        }
    }
}

impl Default for SocketPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SocketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketPool")
            .field("interval", &self.shared.interval)
            .field("running", &self.is_running())
            .field("waiting", &self.waiting())
            .finish()
    }
}

// Removes a waiter only if it is the one captured in the poll snapshot.
fn take_waiter(
    waiters: &mut HashMap<Interest, Waiter>,
    fd: RawFd,
    direction: Direction,
    id: Option<u64>,
) -> Option<Waiter> {
    let id = id?;
    let interest = Interest { fd, direction };
    match waiters.get(&interest) {
        Some(waiter) if waiter.id == id => waiters.remove(&interest),
        _ => None,
    }
}

fn poll_descriptors(
    mut fds: Vec<libc::pollfd>,
    timeout: c_int,
) -> (Vec<libc::pollfd>, io::Result<usize>) {
    // SAFETY: `fds` is a valid, exclusively borrowed array of `fds.len()` pollfds.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
    let outcome = if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    };
    (fds, outcome)
}

/// Deregisters a suspended task when its future completes or is dropped.
struct Registration<'a> {
    shared: &'a Shared,
    interest: Interest,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        let ours = matches!(state.waiters.get(&self.interest), Some(w) if w.id == self.id);
        if ours {
            state.waiters.remove(&self.interest);
            trace!(fd = self.interest.fd, direction = %self.interest.direction, "suspension cancelled");
        }
    }
}

/// Marks the pool stopped and cancels every waiter when `run()` exits.
struct Teardown<'a> {
    shared: &'a Shared,
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        let waiters = {
            let mut state = self.shared.state.lock();
            state.running = false;
            mem::take(&mut state.waiters)
        };
        debug!(cancelled = waiters.len(), "socket pool stopped");
        for (_, waiter) in waiters {
            let _ = waiter.resume.send(Err(ReactorError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::pin;
    use std::task::{Context, Poll, Waker};

    use tokio::time::{sleep, timeout};

    use super::*;

    const LIMIT: Duration = Duration::from_secs(5);

    async fn wait_until(condition: impl Fn() -> bool) {
        timeout(LIMIT, async {
            while !condition() {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn spawn_run(pool: &SocketPool) -> tokio::task::JoinHandle<Result<(), ReactorError>> {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run().await })
    }

    async fn poll_once<F: Future>(future: std::pin::Pin<&mut F>) {
        let _ = timeout(Duration::from_millis(20), future).await;
    }

    #[test]
    fn interval_milliseconds() {
        assert_eq!(Interval::immediate().milliseconds(), 0);
        assert_eq!(Interval::seconds(1).milliseconds(), 1000);
        assert_eq!(Interval::from_millis(0), Interval::Immediate);
        assert_eq!(Interval::from(250).as_duration(), Duration::from_millis(250));
        assert_eq!(Interval::default().milliseconds(), 10);
    }

    #[test]
    fn interval_deserializes_from_milliseconds() {
        let interval: Interval = serde_json::from_str("0").unwrap();
        assert_eq!(interval, Interval::Immediate);
        let interval: Interval = serde_json::from_str("25").unwrap();
        assert_eq!(interval, Interval::Milliseconds(25));
    }

    #[tokio::test]
    async fn second_run_fails_while_first_keeps_running() {
        let pool = SocketPool::with_interval(Interval::from_millis(5));
        let first = spawn_run(&pool);
        wait_until(|| pool.is_running()).await;

        let second = timeout(LIMIT, pool.run()).await.unwrap();
        assert!(matches!(second, Err(ReactorError::AlreadyRunning)));
        assert!(pool.is_running());

        let (s1, s2) = Socket::make_non_blocking_pair().unwrap();
        s1.write(&[1], 0).unwrap();
        timeout(LIMIT, pool.suspend(&s2, Direction::Read))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(s2.read_byte(), Ok(1));

        first.abort();
    }

    #[tokio::test]
    async fn suspended_reader_resumes_when_data_arrives() {
        let pool = SocketPool::with_interval(Interval::from_millis(5));
        let runner = spawn_run(&pool);
        let (s1, s2) = Socket::make_non_blocking_pair().unwrap();

        let reader = tokio::spawn({
            let pool = pool.clone();
            async move {
                pool.suspend(&s2, Direction::Read).await?;
                Ok::<_, ReactorError>(s2.read_byte())
            }
        });
        wait_until(|| pool.waiting() == 1).await;
        s1.write(&[42], 0).unwrap();

        let byte = timeout(LIMIT, reader).await.unwrap().unwrap().unwrap();
        assert_eq!(byte, Ok(42));
        assert_eq!(pool.waiting(), 0);
        runner.abort();
    }

    #[tokio::test]
    async fn writable_socket_resumes_immediately() {
        let pool = SocketPool::with_interval(Interval::immediate());
        let runner = spawn_run(&pool);
        let (s1, _s2) = Socket::make_non_blocking_pair().unwrap();

        timeout(LIMIT, pool.suspend(&s1, Direction::Write))
            .await
            .unwrap()
            .unwrap();
        runner.abort();
    }

    #[tokio::test]
    async fn read_and_write_waiters_share_a_descriptor() {
        let pool = SocketPool::with_interval(Interval::from_millis(5));
        let runner = spawn_run(&pool);
        let (s1, s2) = Socket::make_non_blocking_pair().unwrap();

        let mut reading = pin!(pool.suspend(&s2, Direction::Read));
        poll_once(reading.as_mut()).await;
        timeout(LIMIT, pool.suspend(&s2, Direction::Write))
            .await
            .unwrap()
            .unwrap();

        s1.write(&[7], 0).unwrap();
        timeout(LIMIT, reading).await.unwrap().unwrap();
        runner.abort();
    }

    #[tokio::test]
    async fn duplicate_suspend_is_rejected() {
        let pool = SocketPool::new();
        let (_s1, s2) = Socket::make_non_blocking_pair().unwrap();

        {
            let mut first = pin!(pool.suspend(&s2, Direction::Read));
            poll_once(first.as_mut()).await;
            assert_eq!(pool.waiting(), 1);

            let second = pool.suspend(&s2, Direction::Read).await;
            assert!(matches!(
                second,
                Err(ReactorError::AlreadySuspended { direction: Direction::Read, .. })
            ));
            assert_eq!(pool.waiting(), 1);
        }

        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test]
    async fn suspend_on_closed_socket_fails() {
        let pool = SocketPool::new();
        let socket = Socket::from_raw(-1);
        let result = pool.suspend(&socket, Direction::Read).await;
        assert!(matches!(result, Err(ReactorError::InvalidSocket { fd: -1 })));
    }

    #[tokio::test]
    async fn cancelled_task_releases_its_interest() {
        let pool = SocketPool::new();

        let task = tokio::spawn({
            let pool = pool.clone();
            async move {
                let (_s1, s2) = Socket::make_non_blocking_pair()?;
                pool.suspend(&s2, Direction::Read).await?;
                Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
            }
        });
        wait_until(|| pool.waiting() == 1).await;

        task.abort();
        let err = timeout(LIMIT, task).await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test]
    async fn stopping_the_pool_cancels_suspended_tasks() {
        let pool = SocketPool::with_interval(Interval::from_millis(5));
        let runner = spawn_run(&pool);
        wait_until(|| pool.is_running()).await;

        let waiter = tokio::spawn({
            let pool = pool.clone();
            async move {
                let (_s1, s2) = Socket::make_non_blocking_pair().unwrap();
                pool.suspend(&s2, Direction::Read).await
            }
        });
        wait_until(|| pool.waiting() == 1).await;

        runner.abort();
        let result = timeout(LIMIT, waiter).await.unwrap().unwrap();
        assert!(matches!(result, Err(ReactorError::Cancelled)));
        assert!(!pool.is_running());
        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test]
    async fn invalid_descriptor_fails_only_its_waiter() {
        let pool = SocketPool::with_interval(Interval::from_millis(5));
        let runner = spawn_run(&pool);
        let (s1, s2) = Socket::make_non_blocking_pair().unwrap();
        // Far above any descriptor this process has open.
        let unopened = Socket::from_raw(999_999);

        let mut reading = pin!(pool.suspend(&s2, Direction::Read));
        poll_once(reading.as_mut()).await;

        let result = timeout(LIMIT, pool.suspend(&unopened, Direction::Read))
            .await
            .unwrap();
        assert!(matches!(result, Err(ReactorError::InvalidSocket { fd: 999_999 })));
        assert!(pool.is_running());
        assert_eq!(pool.waiting(), 1);

        s1.write(&[1], 0).unwrap();
        timeout(LIMIT, reading).await.unwrap().unwrap();
        assert_eq!(s2.read_byte(), Ok(1));
        runner.abort();
    }

    #[tokio::test]
    async fn poll_failure_stops_the_pool_and_cancels_waiters() {
        // poll(2) rejects more entries than RLIMIT_NOFILE with EINVAL.
        let mut original = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: `original` is a valid rlimit for getrlimit to fill in.
        assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut original) }, 0);
        let lowered = libc::rlimit {
            rlim_cur: original.rlim_cur.min(4096),
            rlim_max: original.rlim_max,
        };
        // SAFETY: lowering the soft limit is always permitted.
        assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &lowered) }, 0);
        let watched = lowered.rlim_cur as usize + 1;

        let pool = SocketPool::with_interval(Interval::from_millis(5));
        let sockets: Vec<Socket> = (0..watched)
            .map(|i| Socket::from_raw(1_000_000 + i as RawFd))
            .collect();
        let mut waiters: Vec<_> = sockets
            .iter()
            .map(|socket| Box::pin(pool.suspend(socket, Direction::Read)))
            .collect();
        let mut cx = Context::from_waker(Waker::noop());
        for waiter in &mut waiters {
            assert!(waiter.as_mut().poll(&mut cx).is_pending());
        }
        assert_eq!(pool.waiting(), watched);

        let result = timeout(LIMIT, pool.run()).await.unwrap();
        // SAFETY: restores the limit read above.
        unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &original) };

        assert!(matches!(
            &result,
            Err(ReactorError::Poll(e)) if e.raw_os_error() == Some(libc::EINVAL)
        ));
        assert!(!pool.is_running());
        assert_eq!(pool.waiting(), 0);
        for waiter in &mut waiters {
            assert!(matches!(
                waiter.as_mut().poll(&mut cx),
                Poll::Ready(Err(ReactorError::Cancelled))
            ));
        }
    }

    #[tokio::test]
    async fn pool_can_run_again_after_stopping() {
        let pool = SocketPool::with_interval(Interval::from_millis(5));
        let runner = spawn_run(&pool);
        wait_until(|| pool.is_running()).await;
        runner.abort();
        wait_until(|| !pool.is_running()).await;

        let runner = spawn_run(&pool);
        wait_until(|| pool.is_running()).await;
        runner.abort();
    }
}
