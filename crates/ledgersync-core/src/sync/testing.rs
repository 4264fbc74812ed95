//! Scripted in-memory backend for exercising the sync algorithms.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::models::{EntityType, SyncQueueEntry, SyncableEntity};

use super::{BackendError, BackendResult, DownstreamDelta, SyncBackend, UpstreamResponse};

/// Canned answer; errors are kept as text because `BackendError` is not `Clone`
type Scripted<T> = Result<T, String>;

#[derive(Default)]
struct Script {
    upstream: VecDeque<Scripted<UpstreamResponse>>,
    downstream: HashMap<EntityType, VecDeque<Scripted<DownstreamDelta>>>,
    initial: HashMap<EntityType, Scripted<Vec<SyncableEntity>>>,
    upstream_calls: Vec<Vec<SyncQueueEntry>>,
    downstream_calls: Vec<(EntityType, String)>,
    initial_calls: Vec<EntityType>,
}

/// Backend whose answers are queued up front.
///
/// Unscripted upstream calls acknowledge the whole batch, unscripted
/// downstream calls return an empty delta that keeps the checkpoint, and
/// unscripted initial calls return an empty collection.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_upstream(&self, response: UpstreamResponse) {
        self.script.lock().unwrap().upstream.push_back(Ok(response));
    }

    pub fn fail_upstream(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .upstream
            .push_back(Err(message.to_string()));
    }

    pub fn push_delta(&self, entity_type: EntityType, delta: DownstreamDelta) {
        self.script
            .lock()
            .unwrap()
            .downstream
            .entry(entity_type)
            .or_default()
            .push_back(Ok(delta));
    }

    pub fn fail_downstream(&self, entity_type: EntityType, message: &str) {
        self.script
            .lock()
            .unwrap()
            .downstream
            .entry(entity_type)
            .or_default()
            .push_back(Err(message.to_string()));
    }

    pub fn set_initial(&self, entity_type: EntityType, records: Vec<SyncableEntity>) {
        self.script
            .lock()
            .unwrap()
            .initial
            .insert(entity_type, Ok(records));
    }

    pub fn fail_initial(&self, entity_type: EntityType, message: &str) {
        self.script
            .lock()
            .unwrap()
            .initial
            .insert(entity_type, Err(message.to_string()));
    }

    pub fn upstream_calls(&self) -> Vec<Vec<SyncQueueEntry>> {
        self.script.lock().unwrap().upstream_calls.clone()
    }

    pub fn downstream_calls(&self) -> Vec<(EntityType, String)> {
        self.script.lock().unwrap().downstream_calls.clone()
    }

    pub fn initial_calls(&self) -> Vec<EntityType> {
        self.script.lock().unwrap().initial_calls.clone()
    }
}

impl SyncBackend for ScriptedBackend {
    async fn upstream(
        &self,
        _tenant_id: &str,
        batch: &[SyncQueueEntry],
    ) -> BackendResult<UpstreamResponse> {
        let mut script = self.script.lock().unwrap();
        script.upstream_calls.push(batch.to_vec());
        match script.upstream.pop_front() {
            Some(answer) => answer.map_err(BackendError::Api),
            None => Ok(UpstreamResponse::acknowledge_all(batch)),
        }
    }

    async fn downstream(
        &self,
        _tenant_id: &str,
        entity_type: EntityType,
        since: &str,
    ) -> BackendResult<DownstreamDelta> {
        let mut script = self.script.lock().unwrap();
        script.downstream_calls.push((entity_type, since.to_string()));
        let scripted = script
            .downstream
            .get_mut(&entity_type)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(answer) => answer.map_err(BackendError::Api),
            None => Ok(DownstreamDelta {
                new_last_synced_timestamp: since.to_string(),
                ..DownstreamDelta::default()
            }),
        }
    }

    async fn initial(
        &self,
        _tenant_id: &str,
        entity_type: EntityType,
    ) -> BackendResult<Vec<SyncableEntity>> {
        let mut script = self.script.lock().unwrap();
        script.initial_calls.push(entity_type);
        match script.initial.get(&entity_type) {
            Some(answer) => answer.clone().map_err(BackendError::Api),
            None => Ok(Vec::new()),
        }
    }
}
