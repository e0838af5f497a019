//! Bounded pool of independently connected drivers.
//!
//! Every slot of the pool moves through `Absent -> Creating -> Idle <->
//! Borrowed -> Destroying -> Absent`. Borrowers that find neither an idle
//! driver nor an absent slot wait until a slot changes state.

use crate::client::driver::{default_span, Driver};
use crate::connection::{DriverConfig, PoolConfig};
use crate::error::{ExasolError, Result};
use crate::query::{QueryOptions, QueryResult};
use crate::transport::messages::{Response, SqlResults};
use crate::transport::{TransportFactory, WebSocketFactory, WebSocketOptions};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

enum Slot {
    Absent,
    Creating,
    Idle(Arc<Driver>),
    Borrowed(Arc<Driver>),
    Destroying,
}

struct State {
    slots: Vec<Slot>,
    draining: bool,
    warmed: bool,
}

impl State {
    fn find(&self, matches: impl Fn(&Slot) -> bool) -> Option<usize> {
        self.slots.iter().position(matches)
    }

    fn count(&self, matches: impl Fn(&Slot) -> bool) -> usize {
        self.slots.iter().filter(|slot| matches(slot)).count()
    }

    fn borrow_idle(&mut self) -> Option<(usize, Arc<Driver>)> {
        self.slots
            .iter_mut()
            .enumerate()
            .find_map(|(index, slot)| match slot {
                Slot::Idle(driver) => {
                    let driver = Arc::clone(driver);
                    *slot = Slot::Borrowed(Arc::clone(&driver));
                    Some((index, driver))
                }
                _ => None,
            })
    }
}

struct Shared {
    config: DriverConfig,
    pool_config: PoolConfig,
    factory: Arc<dyn TransportFactory>,
    state: Mutex<State>,
    changed: Notify,
    span: tracing::Span,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, index: usize, slot: Slot) {
        self.state().slots[index] = slot;
        self.changed.notify_waiters();
    }

    /// Close a driver and free its slot.
    async fn destroy(&self, index: usize, driver: Arc<Driver>) {
        if let Err(e) = driver.close().await {
            tracing::warn!(parent: &self.span, slot = index, error = %e, "Failed to close driver");
        }
        self.set(index, Slot::Absent);
        tracing::debug!(parent: &self.span, slot = index, "Destroyed driver");
    }

    fn release(self: &Arc<Self>, index: usize, driver: Arc<Driver>) {
        let mut state = self.state();
        let reusable = driver.is_connected() && matches!(state.slots[index], Slot::Borrowed(_));
        if reusable {
            state.slots[index] = Slot::Idle(driver);
            drop(state);
            self.changed.notify_waiters();
            return;
        }

        state.slots[index] = Slot::Destroying;
        drop(state);
        tracing::debug!(parent: &self.span, slot = index, "Discarding returned driver");

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = Arc::clone(self);
                runtime.spawn(async move { shared.destroy(index, driver).await });
            }
            Err(_) => self.set(index, Slot::Absent),
        }
    }
}

/// Resets a `Creating` slot to `Absent` unless the driver was installed.
struct CreatingSlot<'a> {
    shared: &'a Shared,
    index: usize,
    armed: bool,
}

impl CreatingSlot<'_> {
    fn install(mut self, slot: Slot) {
        self.armed = false;
        self.shared.set(self.index, slot);
    }
}

impl Drop for CreatingSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.set(self.index, Slot::Absent);
        }
    }
}

/// Snapshot of the pool's slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Drivers that exist, idle or borrowed
    pub size: usize,
    pub idle: usize,
    pub borrowed: usize,
    /// Drivers currently connecting
    pub creating: usize,
    pub draining: bool,
}

/// Bounded pool of [`Driver`]s.
///
/// Each driver owns its own connection and session, so up to `max` queries
/// run in parallel. Drivers are created on demand; the first borrow also
/// connects `min` idle drivers.
///
/// # Example
///
/// ```no_run
/// use exadriver::{DriverConfig, Pool, PoolConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = DriverConfig::builder()
///     .host("localhost")
///     .user("sys")
///     .password("exasol")
///     .build()?;
///
/// let pool = Pool::new(config, PoolConfig::new(1, 10)?);
/// let result = pool.query("SELECT x FROM S.T").await?;
/// println!("{} rows", result.num_rows());
///
/// pool.drain().await;
/// pool.clear().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pool {
    shared: Arc<Shared>,
}

impl Pool {
    /// Create a pool of drivers connecting over WebSocket.
    pub fn new(config: DriverConfig, pool_config: PoolConfig) -> Self {
        let factory = WebSocketFactory::new(WebSocketOptions {
            validate_certificate: config.validate_certificate,
            connect_timeout: config.connect_timeout,
        });
        Self::with_factory(config, pool_config, factory)
    }

    pub fn with_factory(
        config: DriverConfig,
        pool_config: PoolConfig,
        factory: impl TransportFactory + 'static,
    ) -> Self {
        let span = default_span(&config);
        let slots = (0..pool_config.max).map(|_| Slot::Absent).collect();
        Self {
            shared: Arc::new(Shared {
                config,
                pool_config,
                factory: Arc::new(factory),
                state: Mutex::new(State {
                    slots,
                    draining: false,
                    warmed: false,
                }),
                changed: Notify::new(),
                span,
            }),
        }
    }

    /// Log inside `span` instead of the default `exadriver` span.
    ///
    /// Drivers created afterwards log inside the same span.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.span = span,
            None => tracing::warn!(parent: &self.shared.span, "Pool is already shared, keeping its span"),
        }
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.pool_config
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state();
        let idle = state.count(|slot| matches!(slot, Slot::Idle(_)));
        let borrowed = state.count(|slot| matches!(slot, Slot::Borrowed(_)));
        PoolStatus {
            size: idle + borrowed,
            idle,
            borrowed,
            creating: state.count(|slot| matches!(slot, Slot::Creating)),
            draining: state.draining,
        }
    }

    fn claim_absent(&self) -> Option<CreatingSlot<'_>> {
        let mut state = self.shared.state();
        let index = state.find(|slot| matches!(slot, Slot::Absent))?;
        state.slots[index] = Slot::Creating;
        Some(CreatingSlot {
            shared: &self.shared,
            index,
            armed: true,
        })
    }

    async fn create(&self, slot: &CreatingSlot<'_>) -> Result<Arc<Driver>> {
        let driver = Driver::from_parts(
            self.shared.config.clone(),
            Arc::clone(&self.shared.factory),
            self.shared.span.clone(),
        );
        match driver.connect().await {
            Ok(()) => {
                tracing::debug!(parent: &self.shared.span, slot = slot.index, "Created driver");
                Ok(Arc::new(driver))
            }
            Err(e) => {
                tracing::error!(parent: &self.shared.span, error = %e, "Failed to create driver");
                Err(e)
            }
        }
    }

    /// Connect idle drivers until `min` exist.
    pub async fn warm_up(&self) -> Result<()> {
        self.shared.state().warmed = true;

        loop {
            let existing = self.status();
            if existing.size + existing.creating >= self.shared.pool_config.min {
                return Ok(());
            }
            let Some(slot) = self.claim_absent() else {
                return Ok(());
            };
            let driver = self.create(&slot).await?;
            slot.install(Slot::Idle(driver));
        }
    }

    /// Borrow a driver exclusively.
    ///
    /// The driver goes back to the pool when the guard is dropped or passed
    /// to [`Pool::release`]. Drivers that are no longer connected are
    /// destroyed instead of reused.
    ///
    /// # Errors
    ///
    /// - `PoolDraining` once [`Pool::drain`] has been called
    /// - any error of [`Driver::connect`] when a new driver is created
    pub async fn borrow(&self) -> Result<PooledDriver> {
        let warm = !self.shared.state().warmed;
        if warm {
            self.warm_up().await?;
        }

        loop {
            let changed = self.shared.changed.notified();
            {
                let mut state = self.shared.state();
                if state.draining {
                    return Err(ExasolError::PoolDraining);
                }

                if let Some((index, driver)) = state.borrow_idle() {
                    return Ok(PooledDriver {
                        shared: Arc::clone(&self.shared),
                        index,
                        driver,
                    });
                }
            }

            if let Some(slot) = self.claim_absent() {
                let driver = self.create(&slot).await?;
                let index = slot.index;
                slot.install(Slot::Borrowed(Arc::clone(&driver)));
                return Ok(PooledDriver {
                    shared: Arc::clone(&self.shared),
                    index,
                    driver,
                });
            }

            changed.await;
        }
    }

    /// Return a borrowed driver.
    pub fn release(&self, driver: PooledDriver) {
        drop(driver);
    }

    async fn with_driver<T, F, Fut>(&self, operation: &'static str, run: F) -> Result<T>
    where
        F: FnOnce(PooledDriver) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let driver = self.borrow().await.map_err(|e| {
            tracing::error!(parent: &self.shared.span, operation, error = %e, "Failed to borrow driver");
            e
        })?;

        run(driver).await.map_err(|e| {
            tracing::error!(parent: &self.shared.span, operation, error = %e, "Pooled operation failed");
            e
        })
    }

    /// Run a query on a borrowed driver.
    pub async fn query(&self, sql: &str) -> Result<QueryResult> {
        self.query_with(sql, QueryOptions::default()).await
    }

    pub async fn query_with(&self, sql: &str, options: QueryOptions) -> Result<QueryResult> {
        self.with_driver("query", |driver| async move { driver.query_with(sql, options).await })
            .await
    }

    /// Run a statement on a borrowed driver and return its row count.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        self.with_driver("execute", |driver| async move { driver.execute(sql).await })
            .await
    }

    pub async fn execute_batch<S: AsRef<str>>(
        &self,
        statements: &[S],
    ) -> Result<Response<SqlResults>> {
        self.with_driver("execute_batch", |driver| async move {
            driver.execute_batch(statements, QueryOptions::default()).await
        })
        .await
    }

    /// Stop handing out drivers and wait until every borrowed driver is back.
    pub async fn drain(&self) {
        {
            let mut state = self.shared.state();
            if !state.draining {
                state.draining = true;
                tracing::debug!(parent: &self.shared.span, "Draining pool");
            }
        }
        self.shared.changed.notify_waiters();

        loop {
            let changed = self.shared.changed.notified();
            let status = self.status();
            if status.borrowed == 0 && status.creating == 0 {
                return;
            }
            changed.await;
        }
    }

    /// Close every driver in the pool.
    ///
    /// Idle drivers are closed right away; borrowed drivers are closed as
    /// well and destroyed once returned.
    pub async fn clear(&self) {
        let mut idle = Vec::new();
        let mut borrowed = Vec::new();
        {
            let mut state = self.shared.state();
            for (index, slot) in state.slots.iter_mut().enumerate() {
                match std::mem::replace(slot, Slot::Absent) {
                    Slot::Idle(driver) => {
                        *slot = Slot::Destroying;
                        idle.push((index, driver));
                    }
                    Slot::Borrowed(driver) => {
                        *slot = Slot::Destroying;
                        borrowed.push(driver);
                    }
                    other => *slot = other,
                }
            }
        }

        tracing::debug!(
            parent: &self.shared.span,
            idle = idle.len(),
            borrowed = borrowed.len(),
            "Clearing pool"
        );

        for driver in borrowed {
            if let Err(e) = driver.close().await {
                tracing::warn!(parent: &self.shared.span, error = %e, "Failed to close driver");
            }
        }
        for (index, driver) in idle {
            self.shared.destroy(index, driver).await;
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.pool_config)
            .field("status", &self.status())
            .finish()
    }
}

/// A driver borrowed from a [`Pool`].
pub struct PooledDriver {
    shared: Arc<Shared>,
    index: usize,
    driver: Arc<Driver>,
}

impl Deref for PooledDriver {
    type Target = Driver;

    fn deref(&self) -> &Driver {
        &self.driver
    }
}

impl Drop for PooledDriver {
    fn drop(&mut self) {
        self.shared.release(self.index, Arc::clone(&self.driver));
    }
}
