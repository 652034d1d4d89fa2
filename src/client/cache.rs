//! Last-known-good answers.

use super::stats::Counters;
use crate::{resolver::Response, Error};
use hickory_proto::{op::Message, rr::RData};
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

/// The last successful response per queried name. Entries never expire and
/// are only replaced by a newer success.
#[derive(Debug, Default)]
pub(crate) struct LastGood {
    entries: RwLock<HashMap<String, Arc<Message>>>,
}

/// Whether a response is worth remembering: at least one SRV answer.
pub(crate) fn has_srv_answers(message: &Message) -> bool {
    message
        .answers()
        .iter()
        .any(|record| matches!(record.data(), RData::SRV(_)))
}

impl LastGood {
    /// Remembers `message` for `name` if it has SRV answers.
    pub(crate) fn store(&self, name: &str, message: &Message) {
        if !has_srv_answers(message) {
            return;
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(message.clone()));
    }

    /// Replaces a failed or empty result with the remembered response for
    /// `name`, if there is one. Cancellation is passed through untouched.
    pub(crate) fn substitute(
        &self,
        name: &str,
        result: Result<Response, Error>,
        stats: &Counters,
    ) -> Result<Response, Error> {
        let warning = match &result {
            Ok(response) if has_srv_answers(&response.message) => return result,
            Ok(response) => response.warning.clone(),
            Err(Error::Cancelled | Error::Interrupted) => return result,
            Err(err) => Some(err.clone()),
        };

        let cached = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        match cached {
            Some(message) => {
                stats.cache_last_hit();
                #[cfg(feature = "log")]
                tracing::debug!(name, ?warning, "serving last known good answer");
                Ok(Response {
                    message: Message::clone(&message),
                    warning,
                })
            }
            None => {
                stats.cache_last_miss();
                #[cfg(feature = "log")]
                tracing::debug!(name, "no last known good answer");
                result
            }
        }
    }

    /// Forgets every remembered response.
    pub(crate) fn reset(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
