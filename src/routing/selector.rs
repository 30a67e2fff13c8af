//! Round-robin candidate selection
//!
//! Each model's candidates are flattened once into a tenant-interleaved
//! rotation: first deployment of every tenant, then the second of every
//! tenant, and so on. A per-model counter picks where the rotation starts, so
//! `N` failure-free requests hit each of the `k` candidates `N / k` times,
//! rounded up or down. The failover order then decides what follows the
//! primary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::registry::{Candidate, ConfigRegistry, ModelEntry};

use super::{FailoverOrder, ModelNotFoundError};

struct Rotation {
    candidates: Vec<Candidate>,
    next: AtomicUsize,
}

impl Rotation {
    fn new(entry: &ModelEntry) -> Self {
        let groups = entry.groups();
        let longest = groups.iter().map(Vec::len).max().unwrap_or(0);

        let mut candidates = Vec::with_capacity(entry.len());
        for round in 0..longest {
            for group in groups {
                if let Some(candidate) = group.get(round) {
                    candidates.push(candidate.clone());
                }
            }
        }

        Self {
            candidates,
            next: AtomicUsize::new(0),
        }
    }
}

/// Chooses candidates for a model. Holds no per-request state.
pub struct BackendSelector {
    rotations: HashMap<String, Rotation>,
    order: FailoverOrder,
}

impl BackendSelector {
    pub fn new(registry: &ConfigRegistry) -> Self {
        let rotations = registry
            .index()
            .models()
            .map(|entry| (entry.model.clone(), Rotation::new(entry)))
            .collect();

        Self {
            rotations,
            order: registry.failover_order(),
        }
    }

    /// Ordered, deduplicated candidates for one request. The first entry
    /// advances on every call.
    pub fn select(&self, model: &str) -> Result<Vec<Candidate>, ModelNotFoundError> {
        let rotation = self
            .rotations
            .get(model)
            .filter(|r| !r.candidates.is_empty())
            .ok_or_else(|| ModelNotFoundError(model.to_string()))?;

        let k = rotation.candidates.len();
        let start = rotation.next.fetch_add(1, Ordering::Relaxed) % k;
        let rotated = rotation.candidates[start..]
            .iter()
            .chain(&rotation.candidates[..start])
            .cloned();

        let ordered: Vec<Candidate> = match self.order {
            FailoverOrder::Interleave => rotated.collect(),
            FailoverOrder::TenantFirst => {
                let primary_tenant = rotation.candidates[start].tenant.name.clone();
                let (mut same, other): (Vec<_>, Vec<_>) =
                    rotated.partition(|c| c.tenant.name == primary_tenant);
                same.extend(other);
                same
            }
        };

        debug!(
            model = %model,
            primary = %ordered[0].url(),
            candidates = ordered.len(),
            "Selected backend candidates"
        );
        Ok(ordered)
    }
}
