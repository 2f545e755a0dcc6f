use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::handler::RequestHandler;
use crate::cache::Clock;
use crate::error::{Result, SheetcacheError};
use crate::evaluator::FormulaEvaluator;
use crate::protocol::{WorkerRequest, WorkerResponse};

const WORKER_THREAD_NAME: &str = "sheetcache-worker";

/// What the worker thread accepts on its inbox.
#[derive(Clone, Debug)]
pub enum WorkerMessage {
    Request(WorkerRequest),
    /// Undecoded JSON text straight from a transport.
    Raw(String),
}

/// Spawns request handlers onto their own thread.
pub struct Worker;

impl Worker {
    /// Move `handler` onto a dedicated thread and return the caller's end.
    pub fn spawn<E, C>(handler: RequestHandler<E, C>) -> Result<WorkerHandle>
    where
        E: FormulaEvaluator + Send + 'static,
        C: Clock + Send + 'static,
    {
        let (inbox_tx, inbox_rx) = mpsc::channel::<WorkerMessage>();
        let (outbox_tx, outbox_rx) = mpsc::channel::<WorkerResponse>();

        let join = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run(handler, inbox_rx, outbox_tx))?;

        Ok(WorkerHandle {
            inbox: Some(inbox_tx),
            outbox: outbox_rx,
            join: Some(join),
        })
    }
}

/// Worker loop: one message at a time, in arrival order, each to completion.
fn run<E: FormulaEvaluator, C: Clock>(
    mut handler: RequestHandler<E, C>,
    inbox: Receiver<WorkerMessage>,
    outbox: Sender<WorkerResponse>,
) {
    log::debug!("worker started");
    for message in inbox {
        let response = match message {
            WorkerMessage::Request(request) => handler.handle_guarded(request),
            WorkerMessage::Raw(text) => handler.handle_text(&text),
        };
        if let Some(response) = response
            && outbox.send(response).is_err()
        {
            log::debug!("response channel closed; stopping worker");
            break;
        }
    }
    let stats = handler.cache().stats();
    log::debug!(
        "worker stopped: {} entries, hit rate {:.2}, {} dropped",
        stats.size,
        stats.hit_rate,
        handler.dropped_messages()
    );
}

/// Cloneable sending end of a worker's inbox.
#[derive(Clone, Debug)]
pub struct WorkerSender {
    inbox: Sender<WorkerMessage>,
}

impl WorkerSender {
    pub fn post(&self, request: WorkerRequest) -> Result<()> {
        self.send(WorkerMessage::Request(request))
    }

    pub fn post_raw(&self, text: impl Into<String>) -> Result<()> {
        self.send(WorkerMessage::Raw(text.into()))
    }

    fn send(&self, message: WorkerMessage) -> Result<()> {
        self.inbox
            .send(message)
            .map_err(|_| SheetcacheError::WorkerStopped)
    }
}

/// Caller's end of a running worker.
///
/// The worker exits once every sender (this handle's and any
/// [`WorkerSender`] clones) is gone and its inbox is drained.
pub struct WorkerHandle {
    inbox: Option<Sender<WorkerMessage>>,
    outbox: Receiver<WorkerResponse>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn sender(&self) -> Result<WorkerSender> {
        let inbox = self.inbox.as_ref().ok_or(SheetcacheError::WorkerStopped)?;
        Ok(WorkerSender {
            inbox: inbox.clone(),
        })
    }

    pub fn post(&self, request: WorkerRequest) -> Result<()> {
        self.sender()?.post(request)
    }

    pub fn post_raw(&self, text: impl Into<String>) -> Result<()> {
        self.sender()?.post_raw(text)
    }

    /// Stop accepting new messages from this handle. Already queued messages still run.
    pub fn close(&mut self) {
        self.inbox.take();
    }

    /// Block for the next response. `None` once the worker has exited.
    pub fn recv(&self) -> Option<WorkerResponse> {
        self.outbox.recv().ok()
    }

    /// Wait up to `timeout` for the next response.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<WorkerResponse>> {
        match self.outbox.recv_timeout(timeout) {
            Ok(response) => Ok(Some(response)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SheetcacheError::WorkerStopped),
        }
    }

    /// Close the inbox, wait for the worker to finish, and return the
    /// responses it produced that nobody received yet.
    pub fn shutdown(mut self) -> Vec<WorkerResponse> {
        self.close();
        let remaining: Vec<WorkerResponse> = self.outbox.iter().collect();
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            log::error!("worker thread panicked");
        }
        remaining
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Detach rather than join: a live WorkerSender clone would block forever.
        self.inbox.take();
    }
}
