//! Runs a [`FusionEngine`] on its own thread so producers on any thread can
//! submit sensor events. Events are applied strictly in submission order.

use crate::engine::{EstimateSink, FilterStatus, FusionEngine};
use crate::error::WorkerError;
use crate::propagate::ImuSample;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Maximum number of queued events before producers block.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SensorEvent {
    Inertial { timestamp_s: f64, sample: ImuSample },
    Position { timestamp_s: f64, x: f64, y: f64 },
}

impl SensorEvent {
    pub fn timestamp_s(&self) -> f64 {
        match self {
            SensorEvent::Inertial { timestamp_s, .. } | SensorEvent::Position { timestamp_s, .. } => {
                *timestamp_s
            }
        }
    }

    /// Hand the event to the matching engine entry point.
    pub fn apply<S: EstimateSink>(self, engine: &mut FusionEngine<S>) -> FilterStatus {
        match self {
            SensorEvent::Inertial {
                timestamp_s,
                sample,
            } => engine.on_inertial_sample(timestamp_s, sample),
            SensorEvent::Position { timestamp_s, x, y } => {
                engine.on_position_observation(timestamp_s, x, y)
            }
        }
    }
}

enum Command {
    Event(SensorEvent),
    Shutdown,
}

/// Cloneable producer side of a [`FusionWorker`].
#[derive(Clone)]
pub struct FusionHandle {
    tx: Sender<Command>,
}

impl FusionHandle {
    /// Queue an event, blocking while the queue is full.
    pub fn submit(&self, event: SensorEvent) -> Result<(), WorkerError> {
        self.tx
            .send(Command::Event(event))
            .map_err(|_| WorkerError::Stopped)
    }

    pub fn inertial(&self, timestamp_s: f64, sample: ImuSample) -> Result<(), WorkerError> {
        self.submit(SensorEvent::Inertial {
            timestamp_s,
            sample,
        })
    }

    pub fn position(&self, timestamp_s: f64, x: f64, y: f64) -> Result<(), WorkerError> {
        self.submit(SensorEvent::Position { timestamp_s, x, y })
    }
}

pub struct FusionWorker<S: EstimateSink> {
    handle: FusionHandle,
    thread: JoinHandle<FusionEngine<S>>,
}

impl<S: EstimateSink + Send + 'static> FusionWorker<S> {
    /// Move `engine` onto a dedicated thread.
    pub fn spawn(engine: FusionEngine<S>) -> Self {
        let (tx, rx) = bounded::<Command>(EVENT_QUEUE_CAPACITY);
        let thread = thread::spawn(move || run(engine, rx));
        Self {
            handle: FusionHandle { tx },
            thread,
        }
    }

    pub fn handle(&self) -> FusionHandle {
        self.handle.clone()
    }

    /// Stop after every event queued so far has been applied, then return the
    /// engine. Events submitted by other handles afterwards are refused.
    pub fn shutdown(self) -> Result<FusionEngine<S>, WorkerError> {
        // The loop may already have ended if it panicked.
        if self.handle.tx.send(Command::Shutdown).is_err() {
            debug!("fusion worker already stopped before shutdown request");
        }
        self.join()
    }

    /// Wait until every handle has been dropped and the queue drained.
    pub fn join(self) -> Result<FusionEngine<S>, WorkerError> {
        drop(self.handle);
        self.thread.join().map_err(|_| WorkerError::Panicked)
    }
}

fn run<S: EstimateSink>(mut engine: FusionEngine<S>, rx: Receiver<Command>) -> FusionEngine<S> {
    info!("fusion worker started");
    let mut processed: u64 = 0;
    for command in rx.iter() {
        match command {
            Command::Event(event) => {
                let status = event.apply(&mut engine);
                debug!("t={:.4} -> {status:?}", event.timestamp_s());
                processed += 1;
            }
            Command::Shutdown => break,
        }
    }
    info!("fusion worker stopped after {processed} events");
    engine
}
