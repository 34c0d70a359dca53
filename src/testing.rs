//! In-memory cluster used by the reconciler tests.

use crate::cluster::{Cluster, ClusterResource};
use crate::crd::Kappnav;
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::ResourceExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

type Key = (String, String, String);

#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<Key, Value>>,
    writes: Mutex<Vec<String>>,
    failures: Mutex<BTreeMap<String, Error>>,
    status_failure: Mutex<Option<Error>>,
    status_writes: Mutex<usize>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn key<K: ClusterResource>(namespace: &str, name: &str) -> Key {
        (K::kind_name(), namespace.to_string(), name.to_string())
    }

    /// Stores an object as if another actor had created it.
    pub fn insert<K: ClusterResource>(&self, object: &K) {
        let namespace = object.namespace().unwrap_or_default();
        let key = Self::key::<K>(&namespace, &object.name_any());
        let value = serde_json::to_value(object).expect("Object should serialize");
        self.objects.lock().unwrap().insert(key, value);
    }

    pub fn stored<K: ClusterResource>(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&Self::key::<K>(namespace, name))
            .map(|value| serde_json::from_value(value.clone()).expect("Object should deserialize"))
    }

    pub fn count<K: ClusterResource>(&self) -> usize {
        let kind = K::kind_name();
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }

    /// Every create/replace as `"<verb> <Kind> <name>"`, in call order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    pub fn status_writes(&self) -> usize {
        *self.status_writes.lock().unwrap()
    }

    /// Makes every write of `kind` fail with `error`.
    pub fn fail_writes(&self, kind: &str, error: Error) {
        self.failures
            .lock()
            .unwrap()
            .insert(kind.to_string(), error);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn fail_status(&self, error: Option<Error>) {
        *self.status_failure.lock().unwrap() = error;
    }

    fn check_failure<K: ClusterResource>(&self) -> Result<()> {
        match self.failures.lock().unwrap().get(&K::kind_name()) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn store<K: ClusterResource>(&self, verb: &str, namespace: &str, object: &K) -> Result<K> {
        let name = object.name_any();
        let mut value = serde_json::to_value(object)?;
        let mut objects = self.objects.lock().unwrap();
        let key = Self::key::<K>(namespace, &name);
        let version = objects
            .get(&key)
            .and_then(|v| v.pointer("/metadata/resourceVersion"))
            .and_then(Value::as_str)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        value["metadata"]["resourceVersion"] = Value::String((version + 1).to_string());
        objects.insert(key, value.clone());
        self.writes
            .lock()
            .unwrap()
            .push(format!("{} {} {}", verb, K::kind_name(), name));
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn get<K: ClusterResource>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.stored(namespace, name))
    }

    async fn create<K: ClusterResource>(&self, namespace: &str, object: &K) -> Result<K> {
        self.check_failure::<K>()?;
        if self.stored::<K>(namespace, &object.name_any()).is_some() {
            return Err(Error::already_exists(&K::kind_name(), &object.name_any()));
        }
        self.store("create", namespace, object)
    }

    async fn replace<K: ClusterResource>(&self, namespace: &str, object: &K) -> Result<K> {
        self.check_failure::<K>()?;
        if self.stored::<K>(namespace, &object.name_any()).is_none() {
            return Err(Error::not_found(&K::kind_name(), &object.name_any()));
        }
        self.store("replace", namespace, object)
    }

    async fn update_status(&self, instance: &Kappnav) -> Result<()> {
        if let Some(error) = self.status_failure.lock().unwrap().clone() {
            return Err(error);
        }
        let namespace = instance.namespace().unwrap_or_default();
        let mut stored: Kappnav = self
            .stored(&namespace, &instance.name_any())
            .ok_or_else(|| Error::not_found("Kappnav", &instance.name_any()))?;
        stored.status = instance.status.clone();
        self.insert(&stored);
        *self.status_writes.lock().unwrap() += 1;
        Ok(())
    }
}
