//! Property reconciliation for idempotent upserts.

use tether_core::Properties;

use crate::traversal::{Cardinality, ElementRef, TraversalError, TraversalSource};

/// Keys touched by one reconcile run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub removed: Vec<String>,
    pub upserted: Vec<String>,
}

/// Converge an element's properties to exactly `desired`.
///
/// Keys missing from `desired` are dropped, then every desired key is set
/// (single cardinality on vertices). One property per traversal, in order,
/// on the same handle. A failure part way through leaves whatever the engine
/// already committed.
pub async fn reconcile(
    g: &dyn TraversalSource,
    element: ElementRef<'_>,
    desired: &Properties,
) -> Result<ReconcileReport, TraversalError> {
    let current = g.properties(element).await?;
    let mut report = ReconcileReport::default();

    for key in current.keys().filter(|k| !desired.contains_key(*k)) {
        g.drop_property(element, key).await?;
        report.removed.push(key.clone());
    }

    let cardinality = if element.is_vertex() {
        Cardinality::Single
    } else {
        Cardinality::Unspecified
    };
    for (key, value) in desired {
        g.set_property(element, key, value, cardinality).await?;
        report.upserted.push(key.clone());
    }

    tracing::debug!(
        id = element.id(),
        vertex = element.is_vertex(),
        removed = report.removed.len(),
        upserted = report.upserted.len(),
        "Properties reconciled"
    );
    Ok(report)
}
