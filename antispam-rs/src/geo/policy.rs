use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use super::resolver::{GeoResolution, GeoResolver, UnresolvedReason};
use crate::config::{normalize_country_code, EngineConfig};
use crate::error::Result;
use crate::spam::scorer::{Stage, StageOutcome};
use crate::spam::types::{Check, GeoAction, Reason};
use crate::submission::Submission;
use crate::utils::lock;

/// Code used in reasons for addresses without a country
pub const UNRESOLVED_CODE: &str = "unresolved";

/// Country -> action mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoPolicy {
    actions: BTreeMap<String, GeoAction>,
    default_action: GeoAction,
}

impl GeoPolicy {
    pub fn new(default_action: GeoAction) -> Self {
        Self {
            actions: BTreeMap::new(),
            default_action,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let mut policy = GeoPolicy::new(config.geo_default_action);
        for (code, action) in &config.geo_policy {
            policy.set(code, *action)?;
        }
        Ok(policy)
    }

    pub fn set(&mut self, code: &str, action: GeoAction) -> Result<()> {
        let code = normalize_country_code(code)?;
        self.actions.insert(code, action);
        Ok(())
    }

    pub fn remove(&mut self, code: &str) -> Result<bool> {
        let code = normalize_country_code(code)?;
        Ok(self.actions.remove(&code).is_some())
    }

    pub fn set_default(&mut self, action: GeoAction) {
        self.default_action = action;
    }

    pub fn default_action(&self) -> GeoAction {
        self.default_action
    }

    pub fn actions(&self) -> &BTreeMap<String, GeoAction> {
        &self.actions
    }

    /// Action for a resolved country. Countries without a mapping are
    /// allowed; the default action only covers unresolved addresses.
    pub fn action_for(&self, code: &str) -> GeoAction {
        self.actions.get(code).copied().unwrap_or(GeoAction::Allow)
    }
}

/// Pipeline stage applying the geo policy to the sender address
pub struct GeoPolicyCheck {
    resolver: Arc<GeoResolver>,
    policy: Arc<RwLock<GeoPolicy>>,
    flag_score: f64,
}

impl GeoPolicyCheck {
    pub fn new(resolver: Arc<GeoResolver>, policy: Arc<RwLock<GeoPolicy>>, flag_score: f64) -> Self {
        Self {
            resolver,
            policy,
            flag_score,
        }
    }
}

impl Stage for GeoPolicyCheck {
    fn name(&self) -> &'static str {
        "geo"
    }

    fn evaluate(&self, submission: &Submission) -> StageOutcome {
        let resolution = self.resolver.resolve(submission.sender());

        // Infrastructure faults fail open: no default action applies
        if resolution == GeoResolution::Unresolved(UnresolvedReason::DatabaseUnavailable) {
            return StageOutcome::Continue {
                score: 0.0,
                reasons: vec![Reason::degraded(
                    Check::Geo,
                    "geo check skipped: database unavailable",
                )],
            };
        }

        let policy = match lock::read(&self.policy, "geo policy") {
            Ok(policy) => policy,
            Err(e) => {
                warn!("Geo check skipped for {}: {}", submission.id(), e);
                return StageOutcome::Continue {
                    score: 0.0,
                    reasons: vec![Reason::degraded(
                        Check::Geo,
                        "geo check skipped: policy unavailable",
                    )],
                };
            }
        };

        let mut reasons = Vec::new();
        let (code, action) = match &resolution {
            GeoResolution::Resolved(code) => (code.as_str(), policy.action_for(code)),
            GeoResolution::Unresolved(why) => {
                reasons.push(Reason::new(Check::Geo, format!("geo unresolved: {}", why)));
                (UNRESOLVED_CODE, policy.default_action())
            }
        };
        debug!("Sender {} geo {} -> {}", submission.sender(), code, action);

        match action {
            GeoAction::Deny => {
                reasons.push(Reason::new(Check::Geo, format!("geo-denied:{}", code)));
                StageOutcome::Conclusive { reasons }
            }
            GeoAction::Flag => {
                reasons.push(Reason::scored(
                    Check::Geo,
                    format!("geo-flagged:{}", code),
                    self.flag_score,
                ));
                StageOutcome::Continue {
                    score: self.flag_score,
                    reasons,
                }
            }
            GeoAction::Allow => StageOutcome::Continue { score: 0.0, reasons },
        }
    }
}
