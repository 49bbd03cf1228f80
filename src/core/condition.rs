//! Readiness condition model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What a readiness condition checks against the live system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionCheck {
    /// All pods matching the label selector report Ready
    PodsReady { namespace: String, selector: String },

    /// Deployment has as many available replicas as desired
    DeploymentAvailable { namespace: String, name: String },

    /// Job has at least one successful completion
    JobComplete { namespace: String, name: String },

    /// TCP port accepts connections
    TcpAccepts { host: String, port: u16 },

    /// Host name resolves to at least one address
    DnsResolves { host: String },

    /// Ingress has been assigned a load balancer hostname (or IP)
    IngressAddress { namespace: String, name: String },

    /// Command exits with status zero
    CommandSucceeds {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl fmt::Display for ConditionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionCheck::PodsReady { namespace, selector } => {
                write!(f, "pods {} in {} ready", selector, namespace)
            }
            ConditionCheck::DeploymentAvailable { namespace, name } => {
                write!(f, "deployment {}/{} available", namespace, name)
            }
            ConditionCheck::JobComplete { namespace, name } => {
                write!(f, "job {}/{} complete", namespace, name)
            }
            ConditionCheck::TcpAccepts { host, port } => write!(f, "tcp {}:{} accepting", host, port),
            ConditionCheck::DnsResolves { host } => write!(f, "dns {} resolving", host),
            ConditionCheck::IngressAddress { namespace, name } => {
                write!(f, "ingress {}/{} address", namespace, name)
            }
            ConditionCheck::CommandSucceeds { program, args } => {
                write!(f, "`{} {}` succeeding", program, args.join(" "))
            }
        }
    }
}

/// A check plus its polling schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(flatten)]
    pub check: ConditionCheck,

    #[serde(with = "duration_secs", default = "default_poll_interval", rename = "poll_interval_secs")]
    pub poll_interval: Duration,

    #[serde(with = "duration_secs", default = "default_deadline", rename = "deadline_secs")]
    pub deadline: Duration,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_deadline() -> Duration {
    Duration::from_secs(300)
}

impl Condition {
    pub fn new(check: ConditionCheck) -> Self {
        Self {
            check,
            poll_interval: default_poll_interval(),
            deadline: default_deadline(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.check.fmt(f)
    }
}

/// One evaluation of a condition against the live system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub ready: bool,

    /// Human-readable state, kept for diagnostics on timeout
    pub detail: String,

    /// Value discovered while evaluating (e.g. the ingress hostname)
    #[serde(default)]
    pub value: Option<String>,
}

impl Observation {
    pub fn ready(detail: impl Into<String>) -> Self {
        Self {
            ready: true,
            detail: detail.into(),
            value: None,
        }
    }

    pub fn pending(detail: impl Into<String>) -> Self {
        Self {
            ready: false,
            detail: detail.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Serde helper: durations as (fractional) seconds in YAML
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
