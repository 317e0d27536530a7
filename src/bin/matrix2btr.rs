use std::path::PathBuf;
use std::{env, process};

use anyhow::{bail, Context, Result};
use getopts::Options;

use butlr::{
    default_output_name, encode_manifest, parse_resolution, CoordinateColumns, EncodeOptions,
    Genome, Manifest, SourceFormat,
};

//-----------------------------------------------------------------------------

fn main() -> Result<()> {
    env_logger::Builder::from_default_env().init();
    let config = Config::new()?;

    let genome = Genome::load(&config.genome)
        .with_context(|| format!("cannot load genome sizes from {}", config.genome.display()))?;
    let manifest = Manifest::load(&config.manifest, &genome)
        .with_context(|| format!("cannot load manifest from {}", config.manifest.display()))?;
    if manifest.is_empty() {
        bail!("manifest {} names no matrices", config.manifest.display());
    }

    let options = EncodeOptions::new(&config.assembly, config.resolution, config.format);
    encode_manifest(&genome, &manifest, &options, &config.output)
        .with_context(|| format!("cannot encode {}", config.output.display()))?;

    eprintln!("Wrote {}", config.output.display());
    Ok(())
}

//-----------------------------------------------------------------------------

struct Config {
    assembly: String,
    genome: PathBuf,
    manifest: PathBuf,
    resolution: u32,
    output: PathBuf,
    format: SourceFormat,
}

impl Config {
    fn new() -> Result<Config> {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("a", "assembly", "assembly name (required)", "STR");
        opts.optopt("g", "genome", "genome size file (required)", "FILE");
        opts.optopt("m", "matrices", "matrix manifest file (required)", "FILE");
        opts.optopt("r", "resolution", "bin resolution, e.g. 40000 or 40k (required)", "STR");
        opts.optopt("o", "output", "output file (default: <manifest>.<resolution>.btr)", "FILE");
        opts.optflag("d", "dense", "source matrices are dense tab-delimited");
        opts.optopt("s", "skip", "header rows to skip in dense matrices (default: 0)", "INT");
        opts.optopt(
            "c",
            "columns",
            "1-based i,j,value columns in coordinate lists (default: 1,2,3)",
            "I,J,V",
        );
        let matches = opts.parse(&args[1..]).map_err(anyhow::Error::msg)?;

        let header = format!("Usage: {program} -a STR -g FILE -m FILE -r STR [options]");
        if matches.opt_present("help") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }
        let required = |name: &str| -> Result<String> {
            matches
                .opt_str(name)
                .with_context(|| format!("option --{name} is required\n{}", opts.usage(&header)))
        };

        let resolution = parse_resolution(&required("resolution")?)?;
        let manifest = PathBuf::from(required("matrices")?);
        let output = matches
            .opt_str("output")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_output_name(&manifest, resolution));

        let format = if matches.opt_present("dense") {
            if matches.opt_present("columns") {
                bail!("--columns applies to coordinate lists, not dense matrices");
            }
            let skip_rows = match matches.opt_str("skip") {
                Some(text) => text.parse().context("--skip must be an integer")?,
                None => 0,
            };
            SourceFormat::Dense { skip_rows }
        } else {
            if matches.opt_present("skip") {
                bail!("--skip applies to dense matrices, not coordinate lists");
            }
            let columns = match matches.opt_str("columns") {
                Some(text) => parse_columns(&text)?,
                None => CoordinateColumns::default(),
            };
            SourceFormat::Coordinate(columns)
        };

        Ok(Config {
            assembly: required("assembly")?,
            genome: PathBuf::from(required("genome")?),
            manifest,
            resolution,
            output,
            format,
        })
    }
}

fn parse_columns(text: &str) -> Result<CoordinateColumns> {
    let fields: Vec<usize> = text
        .split(',')
        .map(|f| f.trim().parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("invalid column list {text:?}"))?;
    match fields.as_slice() {
        [i, j, v] if *i >= 1 && *j >= 1 && *v >= 1 => Ok(CoordinateColumns {
            row: i - 1,
            col: j - 1,
            value: v - 1,
        }),
        _ => bail!("column list must be three 1-based indices, e.g. 1,2,3"),
    }
}
