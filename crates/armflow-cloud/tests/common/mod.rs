use armflow_cloud::{CloudError, Lookup, ProviderClient, ProviderResponse, ResourceIdentity, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// A provider call as seen by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get(String),
    Put(String),
    Delete(String),
    Poll(String),
    WhatIf(String),
    List(String),
}

/// Provider that replays scripted responses and records every call
#[derive(Default)]
pub struct ScriptedProvider {
    gets: Mutex<VecDeque<ProviderResponse>>,
    puts: Mutex<VecDeque<ProviderResponse>>,
    deletes: Mutex<VecDeque<ProviderResponse>>,
    polls: Mutex<VecDeque<ProviderResponse>>,
    what_ifs: Mutex<VecDeque<ProviderResponse>>,
    groups: Mutex<HashMap<String, Vec<String>>>,
    calls: Mutex<Vec<Call>>,
}

#[allow(dead_code)]
impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(&self, response: ProviderResponse) -> &Self {
        self.gets.lock().unwrap().push_back(response);
        self
    }

    pub fn on_put(&self, response: ProviderResponse) -> &Self {
        self.puts.lock().unwrap().push_back(response);
        self
    }

    pub fn on_delete(&self, response: ProviderResponse) -> &Self {
        self.deletes.lock().unwrap().push_back(response);
        self
    }

    pub fn on_poll(&self, response: ProviderResponse) -> &Self {
        self.polls.lock().unwrap().push_back(response);
        self
    }

    pub fn on_what_if(&self, response: ProviderResponse) -> &Self {
        self.what_ifs.lock().unwrap().push_back(response);
        self
    }

    pub fn with_group(&self, group: &str, ids: &[&str]) -> &Self {
        self.groups.lock().unwrap().insert(
            group.to_string(),
            ids.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matcher: fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matcher(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next(queue: &Mutex<VecDeque<ProviderResponse>>, what: &str) -> Result<ProviderResponse> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CloudError::Transport(format!("no scripted response for {what}")))
    }
}

fn target(identity: &ResourceIdentity) -> String {
    identity.to_string()
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get(&self, identity: &ResourceIdentity) -> Result<ProviderResponse> {
        self.record(Call::Get(target(identity)));
        Self::next(&self.gets, "get")
    }

    async fn create_or_update(
        &self,
        identity: &ResourceIdentity,
        _payload: &serde_json::Value,
    ) -> Result<ProviderResponse> {
        self.record(Call::Put(target(identity)));
        Self::next(&self.puts, "create_or_update")
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<ProviderResponse> {
        self.record(Call::Delete(target(identity)));
        Self::next(&self.deletes, "delete")
    }

    async fn poll(&self, poll_url: &str) -> Result<ProviderResponse> {
        self.record(Call::Poll(poll_url.to_string()));
        Self::next(&self.polls, "poll")
    }

    async fn what_if(
        &self,
        deployment: &ResourceIdentity,
        _template: &serde_json::Value,
    ) -> Result<ProviderResponse> {
        self.record(Call::WhatIf(target(deployment)));
        Self::next(&self.what_ifs, "what_if")
    }

    async fn list_resource_ids(&self, resource_group: &str) -> Result<Lookup<Vec<String>>> {
        self.record(Call::List(resource_group.to_string()));
        Ok(match self.groups.lock().unwrap().get(resource_group) {
            Some(ids) => Lookup::Found(ids.clone()),
            None => Lookup::NotFound,
        })
    }
}
