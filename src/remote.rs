//! Remote data stores
//!
//! Every fetch owns a [`RemoteStore`] that moves through idle → loading → success | error.
//! Consumers watch it through a `tokio::sync::watch` receiver. Each `loading()` hands out a
//! [`Ticket`]; a fetch settles its store with that ticket, and settles from superseded
//! fetches are dropped.

use crate::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// State of one remote value
#[derive(Debug, Clone)]
pub enum RemoteData<T> {
    Idle,
    Loading,
    Success(T),
    Error(Arc<Error>),
}

impl<T> Default for RemoteData<T> {
    fn default() -> Self {
        RemoteData::Idle
    }
}

impl<T> RemoteData<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, RemoteData::Loading)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteData::Success(_) | RemoteData::Error(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            RemoteData::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            RemoteData::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Proof that a fetch started; consumed when the fetch settles
#[derive(Debug)]
#[must_use = "a fetch must settle its store with the ticket it was given"]
pub struct Ticket {
    generation: u64,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Single-writer container for one remote value
pub struct RemoteStore<T> {
    name: &'static str,
    generation: AtomicU64,
    tx: watch::Sender<RemoteData<T>>,
}

impl<T: Clone> RemoteStore<T> {
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(RemoteData::Idle);
        Self {
            name,
            generation: AtomicU64::new(0),
            tx,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enter loading and supersede any fetch still in flight
    pub fn loading(&self) -> Ticket {
        let mut generation = 0;
        self.tx.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = RemoteData::Loading;
        });
        Ticket { generation }
    }

    /// Settle with a value. Returns false if the ticket was stale.
    pub fn success(&self, ticket: Ticket, value: T) -> bool {
        self.settle(ticket, RemoteData::Success(value))
    }

    /// Settle with an error. Returns false if the ticket was stale.
    pub fn error(&self, ticket: Ticket, err: impl Into<Error>) -> bool {
        self.settle(ticket, RemoteData::Error(Arc::new(err.into())))
    }

    /// Settle with the outcome of a fetch
    pub fn settle_with<E: Into<Error>>(&self, ticket: Ticket, result: Result<T, E>) -> bool {
        match result {
            Ok(value) => self.success(ticket, value),
            Err(err) => self.error(ticket, err),
        }
    }

    /// Settle with the outcome of a fetch and hand the outcome back to the caller
    pub fn finish<E: Into<Error>>(&self, ticket: Ticket, result: Result<T, E>) -> Result<T, Arc<Error>> {
        match result {
            Ok(value) => {
                self.settle(ticket, RemoteData::Success(value.clone()));
                Ok(value)
            }
            Err(err) => {
                let err = Arc::new(err.into());
                self.settle(ticket, RemoteData::Error(err.clone()));
                Err(err)
            }
        }
    }

    /// Back to idle; in-flight fetches become stale
    pub fn reset(&self) {
        self.tx.send_modify(|state| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            *state = RemoteData::Idle;
        });
    }

    fn settle(&self, ticket: Ticket, next: RemoteData<T>) -> bool {
        let applied = self.tx.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) != ticket.generation {
                return false;
            }
            *state = next;
            true
        });
        if !applied {
            debug!(
                store = self.name,
                generation = ticket.generation,
                "Discarding superseded fetch result"
            );
        }
        applied
    }

    pub fn subscribe(&self) -> watch::Receiver<RemoteData<T>> {
        self.tx.subscribe()
    }

    /// Snapshot of the current state
    pub fn get(&self) -> RemoteData<T> {
        self.tx.borrow().clone()
    }
}
