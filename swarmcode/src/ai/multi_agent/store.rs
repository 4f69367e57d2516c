use crate::ai::multi_agent::types::{AgentInstance, MultiAgentRequest};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Live requests and their instances, keyed by request id.
///
/// Owned by whoever calls the executor and passed in explicitly. Entries only
/// exist while `execute_multi_agent` is running.
#[derive(Debug, Default)]
pub struct OrchestrationStore {
    requests: Mutex<HashMap<String, StoredRequest>>,
}

#[derive(Debug, Clone)]
pub struct StoredRequest {
    pub request: MultiAgentRequest,
    pub instances: Vec<AgentInstance>,
}

impl OrchestrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, request: MultiAgentRequest, instances: Vec<AgentInstance>) {
        self.requests
            .lock()
            .insert(request.id.clone(), StoredRequest { request, instances });
    }

    pub fn remove(&self, request_id: &str) -> Option<StoredRequest> {
        self.requests.lock().remove(request_id)
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }

    /// Apply `f` to one instance of a live request
    pub fn update_instance<F>(&self, request_id: &str, index: usize, f: F) -> bool
    where
        F: FnOnce(&mut AgentInstance),
    {
        let mut requests = self.requests.lock();
        match requests
            .get_mut(request_id)
            .and_then(|r| r.instances.get_mut(index))
        {
            Some(instance) => {
                f(instance);
                true
            }
            None => false,
        }
    }

    pub fn instance(&self, request_id: &str, index: usize) -> Option<AgentInstance> {
        self.requests
            .lock()
            .get(request_id)
            .and_then(|r| r.instances.get(index).cloned())
    }

    pub fn instances(&self, request_id: &str) -> Vec<AgentInstance> {
        self.requests
            .lock()
            .get(request_id)
            .map(|r| r.instances.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::multi_agent::types::{AgentSpawnConfig, AgentStatus, ExecutionMode};

    #[test]
    fn test_update_and_remove() {
        let store = OrchestrationStore::new();
        let request = MultiAgentRequest::new(
            vec![AgentSpawnConfig::new("a"), AgentSpawnConfig::new("b")],
            ExecutionMode::Sequential,
        );
        let id = request.id.clone();
        let instances = request
            .agents
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, c)| AgentInstance::new(i, c))
            .collect();
        store.insert(request, instances);

        assert!(store.update_instance(&id, 1, |i| {
            i.mark_running();
        }));
        assert!(!store.update_instance(&id, 5, |_| {}));
        let statuses: Vec<AgentStatus> = store.instances(&id).iter().map(|i| i.status).collect();
        assert_eq!(statuses, vec![AgentStatus::Pending, AgentStatus::Running]);

        assert!(store.remove(&id).is_some());
        assert!(store.is_empty());
        assert!(store.instances(&id).is_empty());
    }
}
