use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    // downsample params
    pub voxel_size: f64,

    // deformation params
    pub smoothness_weight: f64,
    pub kernel_width: f64,
    pub outlier_weight: f64,

    // registration params
    pub max_num_iterations: u16,
    pub convergence_criterion: f64,
    pub use_acceleration: bool,
}

impl Config {
    pub fn default_values() -> Config {
        Config {
            voxel_size: 0.05,

            // deformation params
            smoothness_weight: 0.5,
            kernel_width: 2.0,
            outlier_weight: 0.0,

            // registration params
            max_num_iterations: 100,
            convergence_criterion: 0.001,
            use_acceleration: false,
        }
    }
}
