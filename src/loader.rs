//! Loading work on a short-lived background thread. The worker only builds
//! new values and hands them back over a one-slot channel; the owner polls
//! once per frame.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use tracing::{debug, warn};

use crate::error::{Error, Result};

enum State<T> {
    Loading(Receiver<Result<T>>),
    Done(Result<T>),
    Taken,
}

pub struct LoadTask<T> {
    name: String,
    state: State<T>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> LoadTask<T> {
    /// Runs `load` on a named thread.
    pub fn spawn<F>(name: &str, load: F) -> Result<Self>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (sender, receiver) = bounded(1);
        let label = name.to_string();
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let result = load();
            if let Err(e) = &result {
                warn!("{} failed: {}", label, e);
            }
            // the owner may have dropped the task already
            let _ = sender.send(result);
        })?;
        debug!("started {}", name);

        Ok(Self {
            name: name.to_string(),
            state: State::Loading(receiver),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-blocking check; picks up the result once the worker published it.
    pub fn is_loading(&mut self) -> bool {
        if let State::Loading(receiver) = &self.state {
            match receiver.try_recv() {
                Ok(result) => self.finish(result),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => self.finish(Err(Error::LoaderDisconnected)),
            }
        }
        false
    }

    /// Takes the result once loading is over. Later calls return `None`.
    pub fn poll(&mut self) -> Option<Result<T>> {
        if self.is_loading() {
            return None;
        }
        match std::mem::replace(&mut self.state, State::Taken) {
            State::Done(result) => Some(result),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Blocks until the worker is done.
    pub fn wait(mut self) -> Result<T> {
        let result = match std::mem::replace(&mut self.state, State::Taken) {
            State::Loading(receiver) => receiver.recv().unwrap_or(Err(Error::LoaderDisconnected)),
            State::Done(result) => result,
            State::Taken => Err(Error::LoaderDisconnected),
        };
        self.join();
        result
    }

    fn finish(&mut self, result: Result<T>) {
        self.state = State::Done(result);
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("{} panicked", self.name);
            }
        }
    }
}
