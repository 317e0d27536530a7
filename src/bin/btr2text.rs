use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::{env, process};

use anyhow::{bail, Context, Result};
use getopts::Options;

use butlr::{parse_location, ButlrReader, CoordinateUnit, DenseMatrix, Location};

//-----------------------------------------------------------------------------

fn main() -> Result<()> {
    env_logger::Builder::from_default_env().init();
    let config = Config::new()?;

    let reader = ButlrReader::open(&config.input)
        .with_context(|| format!("cannot open {}", config.input.display()))?;

    match &config.query {
        None => print_directory(&reader)?,
        Some((location, unit)) => {
            let dense = reader.query(location, *unit)?;
            let mut out: Box<dyn Write> = match &config.output {
                Some(prefix) => {
                    Box::new(File::create(format!("{prefix}.txt")).map(BufWriter::new)?)
                }
                None => Box::new(BufWriter::new(io::stdout())),
            };
            write_matrix(&mut out, &dense)?;
            out.flush()?;
        }
    }
    Ok(())
}

fn print_directory(reader: &ButlrReader) -> Result<()> {
    let header = reader.header();
    println!("version\t{}", header.version);
    println!("assembly\t{}", header.assembly);
    println!("resolution\t{}", header.resolution);
    for entry in reader.chromosomes() {
        println!("chrom\t{}\t{}", entry.name, entry.size);
    }
    for entry in reader.pairs() {
        println!("pair\t{}\t{}", entry.row, entry.col);
    }
    Ok(())
}

fn write_matrix<W: Write>(out: &mut W, dense: &DenseMatrix) -> Result<()> {
    for row in dense.iter_rows() {
        let fields: Vec<String> = row.iter().map(f32::to_string).collect();
        writeln!(out, "{}", fields.join("\t"))?;
    }
    Ok(())
}

//-----------------------------------------------------------------------------

struct Config {
    input: PathBuf,
    query: Option<(Location, CoordinateUnit)>,
    output: Option<String>,
}

impl Config {
    fn new() -> Result<Config> {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("i", "input", "BUTLR file (required)", "FILE");
        opts.optopt(
            "l",
            "location",
            "base-pair query, e.g. chr1:0-2000000 or chr1:...,chr2:...",
            "LOC",
        );
        opts.optopt("b", "bins", "bin-index query with the same syntax", "LOC");
        opts.optopt("o", "output", "output prefix (default: stdout)", "STR");
        let matches = opts.parse(&args[1..]).map_err(anyhow::Error::msg)?;

        let header = format!("Usage: {program} -i FILE [-l LOC | -b LOC] [options]");
        if matches.opt_present("help") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }
        let input = matches
            .opt_str("input")
            .map(PathBuf::from)
            .with_context(|| format!("option --input is required\n{}", opts.usage(&header)))?;

        let query = match (matches.opt_str("location"), matches.opt_str("bins")) {
            (Some(_), Some(_)) => bail!("--location and --bins are mutually exclusive"),
            (Some(text), None) => Some((parse_location(&text)?, CoordinateUnit::BasePair)),
            (None, Some(text)) => Some((parse_location(&text)?, CoordinateUnit::Bin)),
            (None, None) => None,
        };

        Ok(Config {
            input,
            query,
            output: matches.opt_str("output"),
        })
    }
}
