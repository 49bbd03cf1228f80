//! Typed resource definitions
//!
//! Definitions are built as values and rendered to Kubernetes manifests
//! (JSON) at apply time, so there is no string substitution into YAML.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Reference to another resource by kind and name (same namespace)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Namespace,
    Secret,
    ConfigMap,
    Deployment,
    Service,
    Job,
    Ingress,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::Secret => "secret",
            ResourceKind::ConfigMap => "configmap",
            ResourceKind::Deployment => "deployment",
            ResourceKind::Service => "service",
            ResourceKind::Job => "job",
            ResourceKind::Ingress => "ingress",
        };
        f.write_str(s)
    }
}

/// Where a Secret's data comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretData {
    /// Literal key/value pairs
    Literal(BTreeMap<String, String>),

    /// Identifier in the external secret store, resolved just before apply
    FromReference(String),
}

/// Container workload shared by deployments and jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub image: String,

    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Secrets whose keys are injected as environment variables
    #[serde(default)]
    pub env_from_secrets: Vec<String>,

    /// ConfigMaps whose keys are injected as environment variables
    #[serde(default)]
    pub env_from_config_maps: Vec<String>,
}

impl Workload {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: Vec::new(),
            port: None,
            env: BTreeMap::new(),
            env_from_secrets: Vec::new(),
            env_from_config_maps: Vec::new(),
        }
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_secret_env(mut self, secret: impl Into<String>) -> Self {
        self.env_from_secrets.push(secret.into());
        self
    }

    pub fn with_config_map_env(mut self, config_map: impl Into<String>) -> Self {
        self.env_from_config_maps.push(config_map.into());
        self
    }

    fn container(&self, name: &str) -> Value {
        let mut container = json!({
            "name": name,
            "image": self.image,
        });
        if !self.command.is_empty() {
            container["command"] = json!(self.command);
        }
        if let Some(port) = self.port {
            container["ports"] = json!([{ "containerPort": port }]);
        }
        if !self.env.is_empty() {
            let env: Vec<Value> = self
                .env
                .iter()
                .map(|(k, v)| json!({ "name": k, "value": v }))
                .collect();
            container["env"] = Value::Array(env);
        }
        let mut env_from: Vec<Value> = self
            .env_from_secrets
            .iter()
            .map(|s| json!({ "secretRef": { "name": s } }))
            .collect();
        env_from.extend(
            self.env_from_config_maps
                .iter()
                .map(|c| json!({ "configMapRef": { "name": c } })),
        );
        if !env_from.is_empty() {
            container["envFrom"] = Value::Array(env_from);
        }
        container
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Label `app=<selector>` of the target pods
    pub selector: String,
    pub port: u16,
    pub target_port: u16,
    #[serde(default = "default_service_type")]
    pub service_type: String,
}

fn default_service_type() -> String {
    "ClusterIP".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRoute {
    pub path: String,
    pub service: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressSpec {
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub routes: Vec<IngressRoute>,
}

/// Kind-specific body of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Namespace,
    Secret { data: SecretData },
    ConfigMap { data: BTreeMap<String, String> },
    Deployment {
        #[serde(default = "default_replicas")]
        replicas: u32,
        #[serde(flatten)]
        workload: Workload,
    },
    Service(ServiceSpec),
    Job {
        #[serde(default = "default_backoff_limit")]
        backoff_limit: u32,
        #[serde(flatten)]
        workload: Workload,
    },
    Ingress(IngressSpec),
}

fn default_replicas() -> u32 {
    1
}

fn default_backoff_limit() -> u32 {
    4
}

/// A declarative resource definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub name: String,

    /// Ignored for cluster-scoped kinds
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(flatten)]
    pub spec: ResourceSpec,
}

impl ResourceDefinition {
    fn new(name: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            labels: BTreeMap::new(),
            spec,
        }
    }

    pub fn namespace(name: impl Into<String>) -> Self {
        Self::new(name, ResourceSpec::Namespace)
    }

    pub fn secret(name: impl Into<String>, data: SecretData) -> Self {
        Self::new(name, ResourceSpec::Secret { data })
    }

    pub fn config_map(name: impl Into<String>, data: BTreeMap<String, String>) -> Self {
        Self::new(name, ResourceSpec::ConfigMap { data })
    }

    pub fn deployment(name: impl Into<String>, replicas: u32, workload: Workload) -> Self {
        let name = name.into();
        Self::new(name.clone(), ResourceSpec::Deployment { replicas, workload }).with_label("app", name)
    }

    pub fn service(name: impl Into<String>, spec: ServiceSpec) -> Self {
        Self::new(name, ResourceSpec::Service(spec))
    }

    pub fn job(name: impl Into<String>, workload: Workload) -> Self {
        Self::new(
            name,
            ResourceSpec::Job {
                backoff_limit: default_backoff_limit(),
                workload,
            },
        )
    }

    pub fn ingress(name: impl Into<String>, spec: IngressSpec) -> Self {
        Self::new(name, ResourceSpec::Ingress(spec))
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ResourceKind {
        match self.spec {
            ResourceSpec::Namespace => ResourceKind::Namespace,
            ResourceSpec::Secret { .. } => ResourceKind::Secret,
            ResourceSpec::ConfigMap { .. } => ResourceKind::ConfigMap,
            ResourceSpec::Deployment { .. } => ResourceKind::Deployment,
            ResourceSpec::Service(_) => ResourceKind::Service,
            ResourceSpec::Job { .. } => ResourceKind::Job,
            ResourceSpec::Ingress(_) => ResourceKind::Ingress,
        }
    }

    pub fn is_namespaced(&self) -> bool {
        self.kind() != ResourceKind::Namespace
    }

    /// Stable identity: `kind/namespace/name`
    pub fn key(&self) -> String {
        match (&self.namespace, self.is_namespaced()) {
            (Some(ns), true) => format!("{}/{}/{}", self.kind(), ns, self.name),
            _ => format!("{}/{}", self.kind(), self.name),
        }
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            kind: self.kind(),
            name: self.name.clone(),
        }
    }

    /// Resources this definition needs to exist before it is applied
    pub fn references(&self) -> Vec<ResourceRef> {
        let mut refs = Vec::new();
        let workload = match &self.spec {
            ResourceSpec::Deployment { workload, .. } | ResourceSpec::Job { workload, .. } => Some(workload),
            _ => None,
        };
        if let Some(w) = workload {
            refs.extend(w.env_from_secrets.iter().map(|s| ResourceRef {
                kind: ResourceKind::Secret,
                name: s.clone(),
            }));
            refs.extend(w.env_from_config_maps.iter().map(|c| ResourceRef {
                kind: ResourceKind::ConfigMap,
                name: c.clone(),
            }));
        }
        if let ResourceSpec::Ingress(spec) = &self.spec {
            for route in &spec.routes {
                let r = ResourceRef {
                    kind: ResourceKind::Service,
                    name: route.service.clone(),
                };
                if !refs.contains(&r) {
                    refs.push(r);
                }
            }
        }
        refs
    }

    /// The secret store identifier, if this is a Secret sourced externally
    pub fn secret_reference(&self) -> Option<&str> {
        match &self.spec {
            ResourceSpec::Secret {
                data: SecretData::FromReference(id),
            } => Some(id),
            _ => None,
        }
    }

    /// Return a copy whose externally sourced secret data is replaced by literal values
    pub fn with_resolved_secret(&self, values: BTreeMap<String, String>) -> Self {
        let mut resolved = self.clone();
        if let ResourceSpec::Secret { data } = &mut resolved.spec {
            *data = SecretData::Literal(values);
        }
        resolved
    }

    fn metadata(&self) -> Value {
        let mut meta = Map::new();
        meta.insert("name".into(), json!(self.name));
        if self.is_namespaced() {
            if let Some(ns) = &self.namespace {
                meta.insert("namespace".into(), json!(ns));
            }
        }
        if !self.labels.is_empty() {
            meta.insert("labels".into(), json!(self.labels));
        }
        if let ResourceSpec::Ingress(spec) = &self.spec {
            if !spec.annotations.is_empty() {
                meta.insert("annotations".into(), json!(spec.annotations));
            }
        }
        Value::Object(meta)
    }

    /// Render as a Kubernetes manifest
    ///
    /// A Secret still pointing at the external store renders without data;
    /// resolve it with [`with_resolved_secret`](Self::with_resolved_secret) first.
    pub fn to_manifest(&self) -> Value {
        let metadata = self.metadata();
        match &self.spec {
            ResourceSpec::Namespace => json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": metadata,
            }),
            ResourceSpec::Secret { data } => {
                let mut manifest = json!({
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "type": "Opaque",
                    "metadata": metadata,
                });
                if let SecretData::Literal(values) = data {
                    manifest["stringData"] = json!(values);
                }
                manifest
            }
            ResourceSpec::ConfigMap { data } => json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": metadata,
                "data": data,
            }),
            ResourceSpec::Deployment { replicas, workload } => json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": metadata,
                "spec": {
                    "replicas": replicas,
                    "selector": { "matchLabels": { "app": self.name } },
                    "template": {
                        "metadata": { "labels": { "app": self.name } },
                        "spec": { "containers": [workload.container(&self.name)] },
                    },
                },
            }),
            ResourceSpec::Service(spec) => json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": metadata,
                "spec": {
                    "type": spec.service_type,
                    "selector": { "app": spec.selector },
                    "ports": [{ "port": spec.port, "targetPort": spec.target_port }],
                },
            }),
            ResourceSpec::Job { backoff_limit, workload } => json!({
                "apiVersion": "batch/v1",
                "kind": "Job",
                "metadata": metadata,
                "spec": {
                    "backoffLimit": backoff_limit,
                    "template": {
                        "spec": {
                            "restartPolicy": "Never",
                            "containers": [workload.container(&self.name)],
                        },
                    },
                },
            }),
            ResourceSpec::Ingress(spec) => {
                let paths: Vec<Value> = spec
                    .routes
                    .iter()
                    .map(|r| {
                        json!({
                            "path": r.path,
                            "pathType": "Prefix",
                            "backend": { "service": { "name": r.service, "port": { "number": r.port } } },
                        })
                    })
                    .collect();
                let mut body = json!({ "rules": [{ "http": { "paths": paths } }] });
                if let Some(class) = &spec.class_name {
                    body["ingressClassName"] = json!(class);
                }
                json!({
                    "apiVersion": "networking.k8s.io/v1",
                    "kind": "Ingress",
                    "metadata": metadata,
                    "spec": body,
                })
            }
        }
    }
}

impl fmt::Display for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
