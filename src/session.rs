use crate::{
    config,
    error::Result,
    io,
    point_cloud::PointSet,
    registration::{IterationObserver, RegistrationBackend, RegistrationOutcome},
    voxel_util::voxel_downsample,
};
use std::{
    path::Path,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Loading,
    Downsampling,
    Registering,
    Rendering,
    Done,
    Error,
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub source_loaded: usize,
    pub source_kept: usize,
    pub target_loaded: usize,
    pub target_kept: usize,
    pub outcome: RegistrationOutcome,
    pub elapsed: Duration,
}

/// Drives one registration run through its stages:
/// load -> downsample -> register -> render. Strictly sequential, no retries;
/// any failure parks the session in `Stage::Error` and surfaces the cause to
/// the caller.
pub struct Session {
    config: config::Config,
    stage: Stage,
}

impl Session {
    pub fn new(config: config::Config) -> Session {
        Session {
            config,
            stage: Stage::Idle,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn run(
        &mut self,
        backend: &dyn RegistrationBackend,
        source_path: &Path,
        target_path: &Path,
        observer: &mut dyn IterationObserver,
    ) -> Result<SessionReport> {
        match self.run_stages(backend, source_path, target_path, observer) {
            Ok(report) => {
                self.stage = Stage::Done;
                Ok(report)
            }
            Err(err) => {
                self.stage = Stage::Error;
                Err(err)
            }
        }
    }

    fn run_stages(
        &mut self,
        backend: &dyn RegistrationBackend,
        source_path: &Path,
        target_path: &Path,
        observer: &mut dyn IterationObserver,
    ) -> Result<SessionReport> {
        self.stage = Stage::Loading;
        log::info!("loading {} and {}", source_path.display(), target_path.display());
        let source = io::load(source_path)?;
        let target = io::load(target_path)?;

        self.stage = Stage::Downsampling;
        let source_down = voxel_downsample(&source, self.config.voxel_size)?;
        let target_down = voxel_downsample(&target, self.config.voxel_size)?;
        report_reduction("source", &source, &source_down);
        report_reduction("target", &target, &target_down);

        self.stage = Stage::Registering;
        println!("starting registration...");
        let started = Instant::now();
        let outcome = backend.register(&source_down, &target_down, observer)?;
        let elapsed = started.elapsed();
        println!(
            "registration finished in {:.4} s ({} iterations, error {:.4})",
            elapsed.as_secs_f64(),
            outcome.iterations,
            outcome.error
        );

        self.stage = Stage::Rendering;
        observer.on_complete(&outcome);

        Ok(SessionReport {
            source_loaded: source.len(),
            source_kept: source_down.len(),
            target_loaded: target.len(),
            target_kept: target_down.len(),
            outcome,
            elapsed,
        })
    }
}

fn report_reduction(label: &str, original: &PointSet, downsampled: &PointSet) {
    println!(
        "{} cloud downsampled from {} to {} points",
        label,
        original.len(),
        downsampled.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CpdError;
    use crate::registration::RegistrationState;
    use nalgebra as na;
    use std::cell::Cell;

    struct Counting {
        iterations: usize,
        completed: bool,
    }

    impl Counting {
        fn new() -> Counting {
            Counting {
                iterations: 0,
                completed: false,
            }
        }
    }

    impl IterationObserver for Counting {
        fn on_iteration(&mut self, _state: &RegistrationState<'_>) {
            self.iterations += 1;
        }

        fn on_complete(&mut self, _outcome: &RegistrationOutcome) {
            self.completed = true;
        }
    }

    /// Emits `steps` identity states, so session behavior is testable without
    /// solver runtime.
    struct FixedBackend {
        steps: usize,
        invoked: Cell<bool>,
    }

    impl FixedBackend {
        fn new(steps: usize) -> FixedBackend {
            FixedBackend {
                steps,
                invoked: Cell::new(false),
            }
        }
    }

    impl RegistrationBackend for FixedBackend {
        fn register(
            &self,
            source: &PointSet,
            target: &PointSet,
            observer: &mut dyn IterationObserver,
        ) -> Result<RegistrationOutcome> {
            self.invoked.set(true);
            crate::registration::validate_pair(source, target)?;
            for iteration in 0..self.steps {
                observer.on_iteration(&RegistrationState {
                    iteration,
                    error: 1.0 / (iteration + 1) as f64,
                    transformed: source,
                    target,
                });
            }
            Ok(RegistrationOutcome {
                transformed: source.clone(),
                deformation: na::DMatrix::zeros(source.len(), source.dim()),
                error: 1.0 / self.steps as f64,
                iterations: self.steps,
                converged: true,
            })
        }
    }

    fn write_cloud(dir: &tempfile::TempDir, name: &str, rows: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, rows).unwrap();
        path
    }

    #[test]
    fn happy_path_reaches_done() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_cloud(&dir, "src.xyz", "0 0 0\n1 0 0\n0 1 0\n");
        let tgt = write_cloud(&dir, "tgt.xyz", "0.1 0 0\n1.1 0 0\n0.1 1 0\n");

        let mut config = config::Config::default_values();
        config.voxel_size = 0.05;
        let backend = FixedBackend::new(3);
        let mut observer = Counting::new();
        let mut session = Session::new(config);
        let report = session.run(&backend, &src, &tgt, &mut observer).unwrap();

        assert_eq!(session.stage(), Stage::Done);
        assert_eq!(report.source_loaded, 3);
        assert!(report.source_kept <= report.source_loaded);
        assert_eq!(observer.iterations, 3);
        assert!(observer.completed);
    }

    #[test]
    fn missing_source_stops_before_downsampling() {
        let dir = tempfile::tempdir().unwrap();
        let tgt = write_cloud(&dir, "tgt.xyz", "0 0 0\n");

        let backend = FixedBackend::new(3);
        let mut observer = Counting::new();
        let mut session = Session::new(config::Config::default_values());
        let err = session
            .run(&backend, &dir.path().join("absent.xyz"), &tgt, &mut observer)
            .unwrap_err();

        assert!(matches!(err, CpdError::Load { .. }));
        assert_eq!(session.stage(), Stage::Error);
        assert!(!backend.invoked.get());
        assert_eq!(observer.iterations, 0);
        assert!(!observer.completed);
    }

    #[test]
    fn bad_voxel_size_stops_before_registering() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_cloud(&dir, "src.xyz", "0 0 0\n");
        let tgt = write_cloud(&dir, "tgt.xyz", "0 0 0\n");

        let mut config = config::Config::default_values();
        config.voxel_size = 0.0;
        let backend = FixedBackend::new(1);
        let mut observer = Counting::new();
        let mut session = Session::new(config);
        let err = session.run(&backend, &src, &tgt, &mut observer).unwrap_err();

        assert!(matches!(err, CpdError::InvalidParameter(_)));
        assert_eq!(session.stage(), Stage::Error);
        assert!(!backend.invoked.get());
    }

    #[test]
    fn mismatched_dimensions_stop_in_registering() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_cloud(&dir, "src.xyz", "0 0 0\n1 1 1\n");
        let tgt = write_cloud(&dir, "tgt.xyz", "0 0\n1 1\n");

        let backend = FixedBackend::new(1);
        let mut observer = Counting::new();
        let mut session = Session::new(config::Config::default_values());
        let err = session.run(&backend, &src, &tgt, &mut observer).unwrap_err();

        assert!(matches!(err, CpdError::Registration(_)));
        assert_eq!(session.stage(), Stage::Error);
        assert_eq!(observer.iterations, 0);
    }
}
