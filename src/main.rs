use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use safe_unicycle::config::Config;
use safe_unicycle::*;

/// Main function for the simulation
fn main() -> Result<(), SimulationError> {
    env_logger::builder()
        .parse_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let mut config_path = "config/sim.yaml";
    let args: Vec<String> = std::env::args().collect();
    if args.len() == 2 {
        config_path = &args[1];
    } else {
        log::warn!("Usage: {} <config.yaml>", args[0]);
        log::warn!("Loading default configuration: {config_path}");
    }
    let config = Config::from_yaml(config_path)?;
    config.validate()?;

    let mut world_rng = ChaCha8Rng::seed_from_u64(config.simulation.seed);
    let world = World::generate(&config.world, &mut world_rng)?;
    let mut simulation = Simulation::new(&config, world)?;
    simulation.run();

    let exporter = DataExporter::new(&config.output);
    exporter.export(simulation.log())?;

    let state = simulation.state();
    log::info!(
        "simulation completed: {} ticks, final position ({:.3}, {:.3})",
        simulation.log().len(),
        state.x,
        state.y
    );
    Ok(())
}
