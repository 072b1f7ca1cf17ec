use clap::Parser;
use simple_cpd::{
    cpd_pipeline::CpdPipeline, error::Result, io, session::Session, viz::RegistrationViz,
};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "cpd-config.json";

/// Deformable registration of two point clouds with a live view.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// source point cloud (.pcd/.ply/.xyz)
    src: PathBuf,

    /// target point cloud (.pcd/.ply/.xyz)
    tgt: PathBuf,
}

fn run(cli: &Cli) -> Result<()> {
    let config = io::config_or_default(Path::new(CONFIG_FILE))?;
    let mut viz = RegistrationViz::spawn("simple-cpd")?;
    let backend = CpdPipeline::new(config.clone());
    let mut session = Session::new(config);
    session.run(&backend, &cli.src, &cli.tgt, &mut viz)?;
    println!("close the viewer window to finish inspecting the alignment");
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
