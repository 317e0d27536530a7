use std::path::PathBuf;
use std::{env, process};

use anyhow::{Context, Result};
use getopts::Options;

use butlr::{split_homer_matrix, Genome};

//-----------------------------------------------------------------------------

fn main() -> Result<()> {
    env_logger::Builder::from_default_env().init();
    let config = Config::new()?;

    let genome = Genome::load(&config.genome)
        .with_context(|| format!("cannot load genome sizes from {}", config.genome.display()))?;
    let split = split_homer_matrix(&config.input, &genome, &config.prefix)
        .with_context(|| format!("cannot split {}", config.input.display()))?;

    eprintln!(
        "Wrote {} matrices at resolution {} and manifest {}",
        split.matrices.len(),
        split.resolution,
        split.manifest.display()
    );
    Ok(())
}

//-----------------------------------------------------------------------------

struct Config {
    input: PathBuf,
    genome: PathBuf,
    prefix: String,
}

impl Config {
    fn new() -> Result<Config> {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("i", "input", "whole-genome dense matrix (required)", "FILE");
        opts.optopt("g", "genome", "genome size file (required)", "FILE");
        opts.optopt("o", "output", "output prefix (required)", "STR");
        let matches = opts.parse(&args[1..]).map_err(anyhow::Error::msg)?;

        let header = format!("Usage: {program} -i FILE -g FILE -o STR");
        if matches.opt_present("help") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }
        let required = |name: &str| -> Result<String> {
            matches
                .opt_str(name)
                .with_context(|| format!("option --{name} is required\n{}", opts.usage(&header)))
        };

        Ok(Config {
            input: PathBuf::from(required("input")?),
            genome: PathBuf::from(required("genome")?),
            prefix: required("output")?,
        })
    }
}
