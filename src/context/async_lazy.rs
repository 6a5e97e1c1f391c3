//! Async lazy directories
//!
//! The core never waits. An async lazy directory answers a first read with
//! [`AsyncValue::Loading`] after handing the key to a `start` callback together with a
//! [`CallId`]. Whoever performs the external work later calls
//! [`Context::resolve_async`], which writes the outcome into the directory's results
//! input through the ordinary write path. That write invalidates the cached `Loading`
//! entry, so the next read sees the result.

use super::Context;
use crate::dir::{DirName, LazyFn};
use crate::error::StoreError;
use crate::types::{CallId, DirId};
use crate::value::{File, Key};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Kicks off the external computation of one key.
pub type AsyncStart = Arc<dyn Fn(&mut Context, CallId, &Key) -> anyhow::Result<()> + Send + Sync>;

/// State of an asynchronously computed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AsyncValue {
    /// Waiting for a result; `previous` is the last successful value, if any.
    Loading { previous: Option<Vec<File>> },
    Success { files: Vec<File> },
    Failure {
        previous: Option<Vec<File>>,
        error: String,
    },
}

impl AsyncValue {
    /// Last known good files.
    pub fn latest(&self) -> Option<&[File]> {
        match self {
            AsyncValue::Success { files } => Some(files),
            AsyncValue::Loading { previous } | AsyncValue::Failure { previous, .. } => {
                previous.as_deref()
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, AsyncValue::Loading { .. })
    }

    fn to_file(&self) -> Result<File, StoreError> {
        File::encode(self)
    }

    fn from_files(files: &[File]) -> Result<Option<AsyncValue>, StoreError> {
        files.first().map(File::decode).transpose()
    }
}

#[derive(Clone)]
pub(crate) struct AsyncDirState {
    pub(crate) results: DirId,
    pub(crate) start: AsyncStart,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingCall {
    pub(crate) dir: DirId,
    pub(crate) results: DirId,
    pub(crate) key: Key,
}

impl Context {
    /// Register an async lazy directory `name` and its results input `name/results/`.
    pub fn mk_async_lazy(&mut self, name: DirName, start: AsyncStart) -> Result<DirId, StoreError> {
        let results = self.mkdir(name.sub("results")?, true, Vec::new())?;
        let id = self.state.next_id();

        let compute: LazyFn = Arc::new(
            move |ctx: &mut Context, _name: &DirName, key: &Key| -> anyhow::Result<Option<Vec<File>>> {
                let status = ctx.get_array(results, key)?;
                if !status.is_empty() {
                    return Ok(Some(status));
                }
                if !ctx.has_pending_call(id, key) {
                    ctx.begin_async_call(id, key)?;
                    // The callback may have resolved synchronously.
                    let status = ctx.get_array(results, key)?;
                    if !status.is_empty() {
                        return Ok(Some(status));
                    }
                }
                Ok(Some(vec![AsyncValue::Loading { previous: None }.to_file()?]))
            },
        );

        let registered = self.mk_lazy(name, compute, false)?;
        self.state
            .async_dirs
            .insert(registered, AsyncDirState { results, start });
        Ok(registered)
    }

    /// Current state of `key` in an async lazy directory, starting the computation if needed.
    pub fn get_async(&mut self, id: DirId, key: &Key) -> Result<AsyncValue, StoreError> {
        let files = self.get_array(id, key)?;
        Ok(AsyncValue::from_files(&files)?.unwrap_or(AsyncValue::Loading { previous: None }))
    }

    /// Complete an outstanding call with its files or an error message.
    pub fn resolve_async(
        &mut self,
        call: CallId,
        result: Result<Vec<File>, String>,
    ) -> Result<(), StoreError> {
        let pending = self
            .state
            .pending_calls
            .remove(&call)
            .ok_or(StoreError::UnknownAsyncCall(call))?;
        let previous = self.previous_async(pending.results, &pending.key)?;
        let status = match result {
            Ok(files) => AsyncValue::Success { files },
            Err(error) => AsyncValue::Failure { previous, error },
        };
        let ok = matches!(status, AsyncValue::Success { .. });
        info!(call = %call, key = %pending.key, ok, "Resolved async call");
        self.write_array(pending.results, pending.key, vec![status.to_file()?])
    }

    /// Start a fresh computation of `key`, keeping its last good value visible as
    /// `Loading { previous }` until the new call resolves.
    pub fn retry_async(&mut self, id: DirId, key: &Key) -> Result<CallId, StoreError> {
        let results = self.async_state(id)?.results;
        let previous = self.previous_async(results, key)?;
        let call = self.begin_async_call(id, key)?;
        // A failed start leaves the stored status alone. A synchronous start has
        // already written its outcome.
        if self.state.pending_calls.contains_key(&call) {
            self.write_array(
                results,
                key.clone(),
                vec![AsyncValue::Loading { previous }.to_file()?],
            )?;
        }
        Ok(call)
    }

    /// Calls started and not yet resolved.
    pub fn pending_async_calls(&self) -> Vec<CallId> {
        self.state.pending_calls.keys().copied().collect()
    }

    fn has_pending_call(&self, id: DirId, key: &Key) -> bool {
        self.state
            .pending_calls
            .values()
            .any(|call| call.dir == id && &call.key == key)
    }

    fn async_state(&self, id: DirId) -> Result<AsyncDirState, StoreError> {
        match self.state.async_dirs.get(&id) {
            Some(state) => Ok(state.clone()),
            None => Err(StoreError::WrongDirectoryKind {
                dir: self.dir_name(id)?,
                expected: "an async lazy directory",
            }),
        }
    }

    fn begin_async_call(&mut self, id: DirId, key: &Key) -> Result<CallId, StoreError> {
        let state = self.async_state(id)?;
        let call = CallId(self.state.next_call);
        self.state.next_call += 1;
        self.state.pending_calls.insert(
            call,
            PendingCall {
                dir: id,
                results: state.results,
                key: key.clone(),
            },
        );
        debug!(call = %call, key = %key, "Starting async call");

        if let Err(err) = (state.start)(self, call, key) {
            self.state.pending_calls.remove(&call);
            return Err(StoreError::from_transform(&self.dir_name(id)?, key, err));
        }
        Ok(call)
    }

    fn previous_async(&self, results: DirId, key: &Key) -> Result<Option<Vec<File>>, StoreError> {
        let files = self.state.eager(results)?.get_array(key);
        Ok(AsyncValue::from_files(files)?.and_then(|value| value.latest().map(<[File]>::to_vec)))
    }
}
