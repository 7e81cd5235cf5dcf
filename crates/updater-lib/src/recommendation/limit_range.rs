//! Namespace LimitRange lookup
//!
//! Recommendations are clamped into the container-level LimitRange bounds of
//! the pod's namespace. The calculator is a seam: production wiring builds a
//! per-tick snapshot from listed LimitRange objects, and degrades to the
//! no-op calculator when the listing is unavailable.

use crate::models::{ObjectMeta, Quantity, ResourceList, ResourceName};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Container-level bounds extracted from a namespace's LimitRange objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitRangeBounds {
    pub min: ResourceList,
    pub max: ResourceList,
}

impl LimitRangeBounds {
    fn merge_restrictive(&mut self, other: &LimitRangeBounds) {
        for (resource, value) in &other.min {
            let entry = self.min.entry(*resource).or_insert(*value);
            if *value > *entry {
                *entry = *value;
            }
        }
        for (resource, value) in &other.max {
            let entry = self.max.entry(*resource).or_insert(*value);
            if *value < *entry {
                *entry = *value;
            }
        }
    }

    pub fn min_for(&self, resource: ResourceName) -> Option<Quantity> {
        self.min.get(&resource).copied()
    }

    pub fn max_for(&self, resource: ResourceName) -> Option<Quantity> {
        self.max.get(&resource).copied()
    }
}

/// Looks up the effective container LimitRange bounds for a namespace.
pub trait LimitRangeCalculator: Send + Sync {
    fn container_limit_range(&self, namespace: &str) -> Result<Option<LimitRangeBounds>>;
}

/// Calculator that never reports bounds. Substituted at startup when the
/// LimitRange listing cannot be established, and per tick when a listing
/// fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLimitsCalculator;

impl LimitRangeCalculator for NoopLimitsCalculator {
    fn container_limit_range(&self, _namespace: &str) -> Result<Option<LimitRangeBounds>> {
        Ok(None)
    }
}

/// Wire shape of a cluster LimitRange object, trimmed to the fields the
/// updater reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitRange {
    pub metadata: ObjectMeta,
    pub spec: LimitRangeSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitRangeSpec {
    pub limits: Vec<LimitRangeItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitRangeItem {
    #[serde(rename = "type")]
    pub limit_type: String,
    pub min: ResourceList,
    pub max: ResourceList,
}

pub const LIMIT_TYPE_CONTAINER: &str = "Container";

/// Immutable per-tick view over the cluster's LimitRange objects.
///
/// Multiple container-type items in one namespace are merged restrictively:
/// the highest min and the lowest max win.
#[derive(Debug, Default)]
pub struct LimitRangeSnapshot {
    by_namespace: HashMap<String, LimitRangeBounds>,
}

impl LimitRangeSnapshot {
    pub fn from_objects(objects: &[LimitRange]) -> Self {
        let mut by_namespace: HashMap<String, LimitRangeBounds> = HashMap::new();
        for object in objects {
            for item in &object.spec.limits {
                if item.limit_type != LIMIT_TYPE_CONTAINER {
                    continue;
                }
                let bounds = LimitRangeBounds {
                    min: item.min.clone(),
                    max: item.max.clone(),
                };
                by_namespace
                    .entry(object.metadata.namespace.clone())
                    .and_modify(|existing| existing.merge_restrictive(&bounds))
                    .or_insert(bounds);
            }
        }
        Self { by_namespace }
    }
}

impl LimitRangeCalculator for LimitRangeSnapshot {
    fn container_limit_range(&self, namespace: &str) -> Result<Option<LimitRangeBounds>> {
        Ok(self.by_namespace.get(namespace).cloned())
    }
}
