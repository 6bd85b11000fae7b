use clap::Parser;

use tierstack::{
    config::{CliArgs, RunConfig},
    run,
};

fn main() {
    let cli = CliArgs::parse();
    match RunConfig::from_env_and_args(cli) {
        Ok(config) => {
            if let Err(err) = run::run(config) {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        }
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    }
}
