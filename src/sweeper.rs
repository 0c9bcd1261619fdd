//! Background sweeping.
//!
//! A `Sweeper` owns one thread that periodically sweeps a reclaim target,
//! or runs a reclamation pass when its pressure probe says so. Nothing in the
//! crate needs one: sets also unlink dead references as accesses find them.

use crate::reclaim::{Pressure, Reclaim};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_NAME: &str = "fib-set-sweeper";

type PressureProbe = Box<dyn Fn() -> Option<Pressure> + Send>;

#[derive(Debug, Error)]
pub enum SweeperError {
    #[error("failed to spawn sweeper thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Configures and starts a `Sweeper`.
pub struct SweeperBuilder {
    interval: Duration,
    name: String,
    pressure: Option<PressureProbe>,
}

impl SweeperBuilder {
    /// Time between ticks. Defaults to one second.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Polled once per tick; `Some(p)` turns that tick into `reclaim(p)`.
    pub fn pressure<F>(mut self, probe: F) -> Self
    where
        F: Fn() -> Option<Pressure> + Send + 'static,
    {
        self.pressure = Some(Box::new(probe));
        self
    }

    pub fn spawn(self, target: Arc<dyn Reclaim>) -> Result<Sweeper, SweeperError> {
        let (stop, stopped) = mpsc::channel::<()>();
        let SweeperBuilder {
            interval,
            name,
            pressure,
        } = self;
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            tracing::debug!(?interval, "sweeper started");
            loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                match pressure.as_ref().and_then(|probe| probe()) {
                    Some(p) => {
                        target.reclaim(p);
                    }
                    None => {
                        target.sweep();
                    }
                }
            }
            tracing::debug!("sweeper stopped");
        })?;
        Ok(Sweeper {
            name,
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

/// Handle to a running sweeper thread. Dropping it stops and joins the thread.
pub struct Sweeper {
    name: String,
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn builder() -> SweeperBuilder {
        SweeperBuilder {
            interval: DEFAULT_INTERVAL,
            name: DEFAULT_NAME.to_owned(),
            pressure: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the thread and waits for the current tick to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        // Dropping the sender wakes the thread with `Disconnected`.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(name = %self.name, "sweeper thread panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

impl core::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sweeper")
            .field("name", &self.name)
            .field("running", &self.handle.is_some())
            .finish()
    }
}
