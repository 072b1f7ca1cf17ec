use crate::{
    error::{CpdError, Result},
    point_cloud::PointSet,
    registration::{IterationObserver, RegistrationOutcome, RegistrationState},
};
use std::{thread, time::Duration};

const POINT_RADIUS: f32 = 0.05;
const TARGET_COLOR: (u8, u8, u8, u8) = (70, 70, 230, 102);

/// Live view of a registration run.
///
/// Owns the recording stream for the whole session: one `iteration` timeline
/// step per solver iteration, with the moving source colored by how far each
/// point has traveled and the target kept dimmed underneath. The spawned
/// viewer process outlives the session, so the last frame stays on screen
/// until the user closes the window.
pub struct RegistrationViz {
    recording: rerun::RecordingStream,
    baseline: Option<PointSet>,
    frame_pause: Duration,
}

impl RegistrationViz {
    pub fn spawn(app_id: &str) -> Result<RegistrationViz> {
        let recording = rerun::RecordingStreamBuilder::new(app_id)
            .spawn()
            .map_err(|e| CpdError::Render(e.to_string()))?;
        Ok(RegistrationViz {
            recording,
            baseline: None,
            frame_pause: Duration::from_millis(100),
        })
    }

    fn log_points(&self, entity: &str, points: &PointSet, colors: Vec<(u8, u8, u8, u8)>) {
        let result = if points.dim() == 2 {
            let positions =
                (0..points.len()).map(|i| (points.coords()[(i, 0)] as f32, points.coords()[(i, 1)] as f32));
            self.recording.log(
                entity,
                &rerun::Points2D::new(positions)
                    .with_radii([POINT_RADIUS])
                    .with_colors(colors),
            )
        } else {
            let positions = (0..points.len()).map(|i| {
                (
                    points.coords()[(i, 0)] as f32,
                    points.coords()[(i, 1)] as f32,
                    points.coords()[(i, 2)] as f32,
                )
            });
            self.recording.log(
                entity,
                &rerun::Points3D::new(positions)
                    .with_radii([POINT_RADIUS])
                    .with_colors(colors),
            )
        };
        // a closed viewer should not kill the solver loop
        if let Err(err) = result {
            log::warn!("dropping render frame for {entity}: {err}");
        }
    }

    fn log_source(&mut self, points: &PointSet) {
        let colors = match &self.baseline {
            Some(baseline) => displacement_colors(points, baseline, 255),
            None => vec![(230, 60, 60, 255); points.len()],
        };
        self.log_points("registration/source", points, colors);
    }
}

impl IterationObserver for RegistrationViz {
    fn on_iteration(&mut self, state: &RegistrationState<'_>) {
        assert_eq!(
            state.transformed.dim(),
            state.target.dim(),
            "transformed source and target dimensionality diverged"
        );
        if let Some(baseline) = &self.baseline {
            assert_eq!(
                state.transformed.len(),
                baseline.len(),
                "transformed source cardinality changed mid-run"
            );
        }

        self.recording
            .set_time_sequence("iteration", state.iteration as i64);
        if self.baseline.is_none() {
            self.baseline = Some(state.transformed.clone());
            self.log_points(
                "registration/target",
                state.target,
                vec![TARGET_COLOR; state.target.len()],
            );
        }
        self.log_source(state.transformed);

        if let Err(err) = self
            .recording
            .log("registration/error", &rerun::Scalar::new(state.error))
        {
            log::warn!("dropping error sample: {err}");
        }
        if let Err(err) = self.recording.log(
            "registration/status",
            &rerun::TextLog::new(format!(
                "iteration {}: error {:.4}",
                state.iteration, state.error
            )),
        ) {
            log::warn!("dropping status line: {err}");
        }

        // let the viewer keep pace with the solver
        thread::sleep(self.frame_pause);
    }

    fn on_complete(&mut self, outcome: &RegistrationOutcome) {
        self.recording
            .set_time_sequence("iteration", outcome.iterations as i64);
        self.log_source(&outcome.transformed);
        self.recording.flush_blocking();
    }
}

/// One color per point, TURBO-ramped by how far the point has moved from its
/// first rendered position.
pub fn displacement_colors(
    points: &PointSet,
    baseline: &PointSet,
    alpha: u8,
) -> Vec<(u8, u8, u8, u8)> {
    let g = colorous::TURBO;
    let displacements: Vec<f64> = (0..points.len())
        .map(|i| (points.point(i) - baseline.point(i)).norm())
        .collect();
    let max_displacement = displacements.iter().copied().fold(0.0, f64::max).max(1e-9);
    displacements
        .iter()
        .map(|d| {
            let c = g.eval_continuous(d / max_displacement);
            (c.r, c.g, c.b, alpha)
        })
        .collect()
}
