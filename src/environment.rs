/// Which networking topology a pass converges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Plain Kubernetes: NodePort service, ingress and a placeholder TLS secret.
    LocalCluster,
    /// OpenShift family: ClusterIP service behind a re-encrypting route.
    OpenShift(OpenShiftFlavor),
}

/// Only decides which console configuration is read for the console URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenShiftFlavor {
    Generic,
    Okd,
    Ocp,
}

pub fn classify(kube_env: &str) -> Topology {
    match kube_env {
        "minikube" | "k8s" => Topology::LocalCluster,
        "okd" | "minishift" => Topology::OpenShift(OpenShiftFlavor::Okd),
        "ocp" => Topology::OpenShift(OpenShiftFlavor::Ocp),
        _ => Topology::OpenShift(OpenShiftFlavor::Generic),
    }
}

impl Topology {
    pub fn is_local(&self) -> bool {
        matches!(self, Topology::LocalCluster)
    }

    /// True for the OpenShift distributions the operator recognises by name.
    pub fn is_recognized_openshift(&self) -> bool {
        matches!(
            self,
            Topology::OpenShift(OpenShiftFlavor::Okd | OpenShiftFlavor::Ocp)
        )
    }
}
