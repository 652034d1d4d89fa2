//! In-memory exchanger for unit tests.

use super::{ExchangeError, Exchanger, Transport};
use async_trait::async_trait;
use hickory_proto::{
    op::{Message, MessageType, ResponseCode},
    rr::{rdata::SRV, Name, RData, Record},
};
use std::{
    net::SocketAddr,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};
use tokio::sync::Semaphore;

type Handler =
    Box<dyn Fn(&Message, SocketAddr, Transport) -> Result<Message, ExchangeError> + Send + Sync>;

/// One exchange seen by a [`MockExchanger`].
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub(crate) server: SocketAddr,
    pub(crate) transport: Transport,
    pub(crate) edns_size: Option<u16>,
}

/// Answers every exchange with a scripted handler and records what it saw.
/// While held, exchanges wait until [`MockExchanger::release`].
pub(crate) struct MockExchanger {
    handler: Mutex<Handler>,
    calls: Mutex<Vec<Call>>,
    held: AtomicBool,
    gate: Semaphore,
}

impl MockExchanger {
    pub(crate) fn new(
        handler: impl Fn(&Message, SocketAddr, Transport) -> Result<Message, ExchangeError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            handler: Mutex::new(Box::new(handler)),
            calls: Mutex::default(),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }

    /// Replaces the handler for subsequent exchanges.
    pub(crate) fn respond_with(
        &self,
        handler: impl Fn(&Message, SocketAddr, Transport) -> Result<Message, ExchangeError>
            + Send
            + Sync
            + 'static,
    ) {
        *self.handler.lock().unwrap() = Box::new(handler);
    }

    pub(crate) fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.add_permits(1024);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exchanger for MockExchanger {
    async fn exchange(
        &self,
        request: &Message,
        server: SocketAddr,
        transport: Transport,
    ) -> Result<Message, ExchangeError> {
        self.calls.lock().unwrap().push(Call {
            server,
            transport,
            edns_size: request.extensions().as_ref().map(|edns| edns.max_payload()),
        });
        if self.held.load(Ordering::SeqCst) {
            let _permit = self.gate.acquire().await.unwrap();
        }
        (self.handler.lock().unwrap())(request, server, transport)
    }
}

/// Builds a NOERROR response to `request` carrying `(priority, weight, port,
/// target)` SRV answers.
pub(crate) fn srv_response(request: &Message, records: &[(u16, u16, u16, &str)]) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_response_code(ResponseCode::NoError)
        .add_queries(request.queries().to_vec());
    let name = request
        .queries()
        .first()
        .map(|query| query.name().clone())
        .unwrap_or_else(Name::root);
    for &(priority, weight, port, target) in records {
        response.add_answer(Record::from_rdata(
            name.clone(),
            60,
            RData::SRV(SRV::new(
                priority,
                weight,
                port,
                Name::from_str(target).unwrap(),
            )),
        ));
    }
    response
}
