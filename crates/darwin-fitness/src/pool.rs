//! Bounded pool of game server connections.
//!
//! The pool hands out at most `max_connections` live [`GameClient`]s. Callers that find
//! the pool saturated block on a condition variable and are served in arrival order, so
//! no caller starves while others keep returning and re-taking connections.
//!
//! # Counters
//!
//! - `open` - live connections, checked out or idle; never exceeds the maximum
//! - `active` - connections currently checked out
//! - `total_created` - connections ever opened

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::client::{ClientError, GameClient};

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum PoolError {
    #[display("connection pool is closed")]
    Closed,
    #[display("failed to open a pooled connection")]
    Client(ClientError),
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub server_addr: String,
    pub max_connections: usize,
    pub timeout: Duration,
}

/// A snapshot of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_connections: usize,
    pub active: usize,
    pub idle: usize,
    pub total_created: usize,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<GameClient>,
    open: usize,
    active: usize,
    total_created: usize,
    closed: bool,
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

#[derive(Debug)]
pub struct ConnectionPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        log::info!(
            "connection pool for {} created (max {} connections)",
            config.server_addr,
            config.max_connections
        );
        Self {
            config,
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes a connection, opening a new one if the pool has room.
    ///
    /// Blocks while every allowed connection is checked out. Waiters are served first
    /// come, first served.
    pub fn get(&self) -> Result<GameClient, PoolError> {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        loop {
            if state.closed {
                state.waiters.retain(|&t| t != ticket);
                self.available.notify_all();
                return Err(PoolError::Closed);
            }
            if state.waiters.front() == Some(&ticket) {
                if let Some(client) = state.idle.pop_front() {
                    if client.is_healthy() {
                        state.waiters.pop_front();
                        state.active += 1;
                        self.available.notify_all();
                        return Ok(client);
                    }
                    log::debug!("discarding unhealthy idle connection");
                    state.open -= 1;
                    drop(client);
                    continue;
                }
                if state.open < self.config.max_connections {
                    state.waiters.pop_front();
                    state.open += 1;
                    state.active += 1;
                    state.total_created += 1;
                    self.available.notify_all();
                    drop(state);
                    return self.open_connection();
                }
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn open_connection(&self) -> Result<GameClient, PoolError> {
        match GameClient::connect(&self.config.server_addr, self.config.timeout) {
            Ok(client) => Ok(client),
            Err(err) => {
                let mut state = self.lock();
                state.open -= 1;
                state.active -= 1;
                self.available.notify_all();
                Err(PoolError::Client(err))
            }
        }
    }

    /// Gives a connection back.
    ///
    /// Healthy connections become idle; unhealthy ones, and any returned after
    /// [`close`](Self::close), are disconnected.
    pub fn return_client(&self, mut client: GameClient) -> Result<(), PoolError> {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        self.available.notify_all();
        if state.closed {
            state.open = state.open.saturating_sub(1);
            client.disconnect();
            return Err(PoolError::Closed);
        }
        if !client.is_healthy() || state.idle.len() >= self.config.max_connections {
            log::debug!("discarding returned connection to {}", client.addr());
            state.open = state.open.saturating_sub(1);
            client.disconnect();
            return Ok(());
        }
        state.idle.push_back(client);
        Ok(())
    }

    /// Closes the pool: idle connections are disconnected and every waiter fails.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        state.open = state.open.saturating_sub(idle.len());
        self.available.notify_all();
        drop(state);
        drop(idle);
        log::info!("connection pool for {} closed", self.config.server_addr);
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            max_connections: self.config.max_connections,
            active: state.active,
            idle: state.idle.len(),
            total_created: state.total_created,
            closed: state.closed,
        }
    }
}

/// Checks that a game server accepts connections at `addr`.
pub fn check_server(addr: &str, timeout: Duration) -> Result<(), ClientError> {
    let mut client = GameClient::connect(addr, timeout)?;
    client.disconnect();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        io::Read,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
        time::Instant,
    };

    use super::*;
    use crate::client::tests::serve;

    fn hold_open_server() -> String {
        serve(|mut reader, _writer| {
            let mut sink = Vec::new();
            let _ = reader.read_to_end(&mut sink);
        })
    }

    fn pool(addr: String, max: usize) -> ConnectionPool {
        ConnectionPool::new(PoolConfig {
            server_addr: addr,
            max_connections: max,
            timeout: Duration::from_secs(2),
        })
    }

    #[test]
    fn test_pool_bounds_concurrent_callers() {
        let pool = Arc::new(pool(hold_open_server(), 2));
        let peak = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let client = pool.get().unwrap();
                    peak.fetch_max(pool.stats().active, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    pool.return_client(client).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(125));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert!(stats.total_created <= 2);
        assert!(stats.idle <= 2);
    }

    #[test]
    fn test_idle_connection_is_reused() {
        let pool = pool(hold_open_server(), 1);
        let client = pool.get().unwrap();
        pool.return_client(client).unwrap();
        let client = pool.get().unwrap();
        pool.return_client(client).unwrap();
        assert_eq!(pool.stats().total_created, 1);
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn test_unhealthy_client_is_discarded() {
        let pool = pool(hold_open_server(), 1);
        let mut client = pool.get().unwrap();
        client.disconnect();
        pool.return_client(client).unwrap();
        let stats = pool.stats();
        assert_eq!((stats.active, stats.idle), (0, 0));
        // the slot is free again
        let client = pool.get().unwrap();
        pool.return_client(client).unwrap();
        assert_eq!(pool.stats().total_created, 2);
    }

    #[test]
    fn test_close_fails_waiters_and_later_calls() {
        let pool = Arc::new(pool(hold_open_server(), 1));
        let held = pool.get().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.get().map(|_| ()))
        };
        thread::sleep(Duration::from_millis(50));
        pool.close();
        assert!(matches!(waiter.join().unwrap(), Err(PoolError::Closed)));
        assert!(matches!(pool.get(), Err(PoolError::Closed)));
        assert!(matches!(pool.return_client(held), Err(PoolError::Closed)));
        assert!(pool.stats().closed);
        assert_eq!(pool.stats().active, 0);
    }

    #[test]
    fn test_connect_failure_releases_slot() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let pool = pool(addr.clone(), 1);
        assert!(matches!(pool.get(), Err(PoolError::Client(_))));
        assert!(matches!(pool.get(), Err(PoolError::Client(_))));
        assert_eq!(pool.stats().active, 0);
        assert!(check_server(&addr, Duration::from_millis(200)).is_err());
    }
}
