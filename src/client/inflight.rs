//! Coalescing of identical concurrent lookups.

use super::{cancel::Cancel, stats::Counters};
use crate::{resolver::Response, Error};
use std::{
    collections::{hash_map::Entry, HashMap},
    future::Future,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::watch;

type Outcome = Option<Arc<Result<Response, Error>>>;

/// Identifies runs that may be shared: the same name asked of the same
/// nameservers in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FlightKey {
    pub(crate) name: String,
    pub(crate) servers: Vec<SocketAddr>,
}

/// Registry of runs currently in flight.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    runs: Mutex<HashMap<FlightKey, watch::Receiver<Outcome>>>,
}

/// Removes a run from the registry when dropped, including on panic.
struct Registration {
    in_flight: Arc<InFlight>,
    key: FlightKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.in_flight
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl InFlight {
    /// Joins the run for `key`, starting it with `work` if there is none.
    ///
    /// The run is spawned so it outlives any caller; `cancel` only ends this
    /// caller's wait. Every waiter gets its own copy of the result.
    pub(crate) async fn run_deduped<F>(
        self: &Arc<Self>,
        key: FlightKey,
        work: F,
        cancel: &Cancel,
        stats: &Counters,
    ) -> Result<Response, Error>
    where
        F: Future<Output = Result<Response, Error>> + Send + 'static,
    {
        let mut outcome = {
            let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
            match runs.entry(key) {
                Entry::Occupied(entry) => {
                    stats.in_flight_hit();
                    #[cfg(feature = "log")]
                    tracing::debug!(name = %entry.key().name, "joined lookup in flight");
                    entry.get().clone()
                }
                Entry::Vacant(entry) => {
                    let (sender, receiver) = watch::channel(None);
                    let registration = Registration {
                        in_flight: self.clone(),
                        key: entry.key().clone(),
                    };
                    entry.insert(receiver.clone());
                    tokio::spawn(async move {
                        let result = work.await;
                        // Deregister before waking anyone so later calls start afresh.
                        drop(registration);
                        let _ = sender.send(Some(Arc::new(result)));
                    });
                    receiver
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.fired() => Err(Error::Cancelled),
            shared = outcome.wait_for(Option::is_some) => match shared {
                Ok(shared) => match &*shared {
                    Some(result) => (**result).clone(),
                    None => Err(Error::Interrupted),
                },
                Err(_) => Err(Error::Interrupted),
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
