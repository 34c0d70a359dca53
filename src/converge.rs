use crate::cluster::{Cluster, ClusterResource};
use crate::crd::Kappnav;
use crate::error::{Error, Result};
use crate::logging::PassLog;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::fmt;

/// What a convergence call did to the stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created => write!(f, "created"),
            Outcome::Updated => write!(f, "updated"),
            Outcome::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// The result of a convergence call and the object as last seen on the cluster.
#[derive(Debug, Clone)]
pub struct Converged<K> {
    pub outcome: Outcome,
    pub object: K,
}

/// Makes the object at `desired`'s key match what `mutate` computes.
///
/// `desired` only needs its name and namespace; it is the starting point when
/// nothing is stored yet. The owner reference of namespaced kinds is stamped
/// after `mutate` on every call, so a resource someone detached is
/// re-attached on the next pass. Errors from the cluster are returned as-is.
pub async fn create_or_update<C, K, F>(
    cluster: &C,
    log: &PassLog,
    owner: &Kappnav,
    desired: K,
    mutate: F,
) -> Result<Converged<K>>
where
    C: Cluster,
    K: ClusterResource,
    F: FnOnce(&mut K) -> Result<()> + Send,
{
    let namespace = desired.namespace().unwrap_or_default();
    let name = desired.name_any();
    let kind = K::kind_name();

    let existing: Option<K> = cluster.get(&namespace, &name).await?;
    let mut object = existing.clone().unwrap_or(desired);

    mutate(&mut object)?;
    if K::NAMESPACED {
        set_controller_reference(owner, &mut object)?;
    }

    let (outcome, object) = match existing {
        None => (Outcome::Created, cluster.create(&namespace, &object).await?),
        Some(existing) if existing == object => (Outcome::Unchanged, object),
        Some(_) => (Outcome::Updated, cluster.replace(&namespace, &object).await?),
    };

    log.info(format!(
        "Reconciled, Kind: {}, Name: {}, Status: {}",
        kind, name, outcome
    ));
    Ok(Converged { outcome, object })
}

/// Sets `owner` as the controller of `object`, keeping any other references.
pub fn set_controller_reference<K: ClusterResource>(owner: &Kappnav, object: &mut K) -> Result<()> {
    let reference = owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::Serialization(format!(
            "Kappnav {} has no uid to reference",
            owner.name_any()
        ))
    })?;

    let name = object.name_any();
    let references = object.meta_mut().owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = references
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != reference.uid)
    {
        return Err(Error::AlreadyOwned {
            kind: K::kind_name(),
            name,
            owner: format!("{} {}", other.kind, other.name),
        });
    }

    upsert_reference(references, reference);
    Ok(())
}

fn upsert_reference(references: &mut Vec<OwnerReference>, reference: OwnerReference) {
    match references.iter_mut().find(|r| r.uid == reference.uid) {
        Some(existing) => *existing = reference,
        None => references.push(reference),
    }
}
