use crate::{
    error::{CpdError, Result},
    point_cloud::PointSet,
};
use nalgebra as na;

/// Snapshot of one solver iteration, handed to the observer synchronously.
///
/// A new state replaces the previous one every iteration; observers read it
/// during the callback and must not hold on to it.
pub struct RegistrationState<'a> {
    pub iteration: usize,
    /// Current variance of the Gaussian mixture. Non-negative, smaller means
    /// a tighter fit, not guaranteed to decrease monotonically.
    pub error: f64,
    pub transformed: &'a PointSet,
    pub target: &'a PointSet,
}

/// Final product of a registration run.
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    /// Source points after the full deformation.
    pub transformed: PointSet,
    /// Per-point displacement applied to the source (the non-rigid transform).
    pub deformation: na::DMatrix<f64>,
    /// Last variance estimate.
    pub error: f64,
    /// Number of iterations performed.
    pub iterations: usize,
    pub converged: bool,
}

/// Receives every intermediate registration state, in iteration order.
pub trait IterationObserver {
    fn on_iteration(&mut self, state: &RegistrationState<'_>);

    /// Called once after the solver terminates, before the session ends.
    fn on_complete(&mut self, _outcome: &RegistrationOutcome) {}
}

/// A solver that aligns `source` onto `target`, pushing every intermediate
/// state to `observer` exactly once per iteration, in increasing order.
pub trait RegistrationBackend {
    fn register(
        &self,
        source: &PointSet,
        target: &PointSet,
        observer: &mut dyn IterationObserver,
    ) -> Result<RegistrationOutcome>;
}

/// Rejects inputs the solver contract does not cover. Runs before the first
/// observer call.
pub fn validate_pair(source: &PointSet, target: &PointSet) -> Result<()> {
    if source.is_empty() || target.is_empty() {
        return Err(CpdError::Registration(
            "source and target point sets must be non-empty".to_string(),
        ));
    }
    if source.dim() != target.dim() {
        return Err(CpdError::Registration(format!(
            "source is {}-dimensional but target is {}-dimensional",
            source.dim(),
            target.dim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_sets() {
        let empty = PointSet::from_xyz(&[]);
        let one = PointSet::from_xyz(&[[0.0, 0.0, 0.0]]);
        assert!(matches!(
            validate_pair(&empty, &one),
            Err(CpdError::Registration(_))
        ));
        assert!(matches!(
            validate_pair(&one, &empty),
            Err(CpdError::Registration(_))
        ));
    }

    #[test]
    fn rejects_mixed_dimensionality() {
        let source = PointSet::from_xyz(&[[0.0, 0.0, 0.0]]);
        let target = PointSet::from_xy(&[[0.0, 0.0]]);
        assert!(matches!(
            validate_pair(&source, &target),
            Err(CpdError::Registration(_))
        ));
    }

    #[test]
    fn accepts_matching_pairs() {
        let source = PointSet::from_xy(&[[0.0, 0.0], [1.0, 0.0]]);
        let target = PointSet::from_xy(&[[0.5, 0.0]]);
        assert!(validate_pair(&source, &target).is_ok());
    }
}
