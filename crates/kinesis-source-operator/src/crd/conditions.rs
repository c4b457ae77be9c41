use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::KinesisSourceStatus;

/// Condition types tracked on a `KinesisSource`. Declaration order is the
/// order conditions are kept in on the status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum ConditionType {
    Deployed,
    Ready,
    SinkProvided,
}

impl ConditionType {
    /// Conditions that feed into `Ready`.
    pub const DEPENDENTS: [ConditionType; 2] =
        [ConditionType::SinkProvided, ConditionType::Deployed];

    pub const ALL: [ConditionType; 3] = [
        ConditionType::Deployed,
        ConditionType::Ready,
        ConditionType::SinkProvided,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(
        r#type: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> Self {
        Self {
            r#type,
            status,
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            reason: non_empty(reason),
            message: non_empty(message),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyState {
    pub status: ConditionStatus,
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// Derives `Ready` from the dependent conditions.
///
/// Any `False` dependent makes `Ready` false and carries its reason, otherwise
/// any `Unknown` (or missing) dependent makes it unknown. Only when every
/// dependent is `True` is `Ready` true.
pub fn aggregate(conditions: &[Condition]) -> ReadyState {
    let dependents: Vec<Option<&Condition>> = ConditionType::DEPENDENTS
        .iter()
        .map(|t| conditions.iter().find(|c| c.r#type == *t))
        .collect();

    if let Some(failed) = dependents
        .iter()
        .flatten()
        .find(|c| c.status == ConditionStatus::False)
    {
        return ReadyState {
            status: ConditionStatus::False,
            reason: failed.reason.clone(),
            message: failed.message.clone(),
        };
    }

    if dependents.iter().all(|c| c.is_some_and(Condition::is_true)) {
        return ReadyState {
            status: ConditionStatus::True,
            reason: None,
            message: None,
        };
    }

    let pending = dependents
        .iter()
        .flatten()
        .find(|c| c.status == ConditionStatus::Unknown);

    ReadyState {
        status: ConditionStatus::Unknown,
        reason: pending.and_then(|c| c.reason.clone()),
        message: pending.and_then(|c| c.message.clone()),
    }
}

impl KinesisSourceStatus {
    pub fn get_condition(&self, t: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == t)
    }

    pub fn is_ready(&self) -> bool {
        self.get_condition(ConditionType::Ready)
            .is_some_and(Condition::is_true)
    }

    /// Sets every unset condition to `Unknown`.
    pub fn initialize_conditions(&mut self) {
        for t in ConditionType::ALL {
            if self.get_condition(t).is_none() {
                self.conditions
                    .push(Condition::new(t, ConditionStatus::Unknown, "", ""));
            }
        }
        self.conditions.sort_by_key(|c| c.r#type);
        self.recompute_ready();
    }

    pub fn mark_sink(&mut self, uri: &str) {
        self.sink_uri = Some(uri.to_string());
        if uri.is_empty() {
            self.set_condition(
                ConditionType::SinkProvided,
                ConditionStatus::Unknown,
                "SinkEmpty",
                "Sink has resolved to empty.",
            );
        } else {
            self.set_condition(ConditionType::SinkProvided, ConditionStatus::True, "", "");
        }
    }

    pub fn mark_no_sink(&mut self, reason: &str, message: &str) {
        self.set_condition(ConditionType::SinkProvided, ConditionStatus::False, reason, message);
    }

    pub fn mark_deployed(&mut self) {
        self.set_condition(ConditionType::Deployed, ConditionStatus::True, "", "");
    }

    pub fn mark_deploying(&mut self, reason: &str, message: &str) {
        self.set_condition(ConditionType::Deployed, ConditionStatus::Unknown, reason, message);
    }

    pub fn mark_not_deployed(&mut self, reason: &str, message: &str) {
        self.set_condition(ConditionType::Deployed, ConditionStatus::False, reason, message);
    }

    fn set_condition(
        &mut self,
        t: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) {
        let mut next = Condition::new(t, status, reason, message);
        match self.conditions.iter_mut().find(|c| c.r#type == t) {
            Some(existing) => {
                if existing.status == status {
                    next.last_transition_time = existing.last_transition_time.take();
                }
                *existing = next;
            }
            None => {
                self.conditions.push(next);
                self.conditions.sort_by_key(|c| c.r#type);
            }
        }

        if t != ConditionType::Ready {
            self.recompute_ready();
        }
    }

    fn recompute_ready(&mut self) {
        let ready = aggregate(&self.conditions);
        self.set_condition(
            ConditionType::Ready,
            ready.status,
            ready.reason.as_deref().unwrap_or_default(),
            ready.message.as_deref().unwrap_or_default(),
        );
    }
}
