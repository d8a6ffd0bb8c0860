use clap::ArgMatches;
use std::path::PathBuf;

/// Driver configuration, straight from the command line.
pub struct Config {
    pub paths: Vec<PathBuf>,
    pub style: Option<String>,
    pub debug: bool,
    pub parse_only: bool,
    pub read_serialized: bool,
    pub write_serialized: Option<PathBuf>,
    pub interpret: bool,
    pub inputs: Vec<PathBuf>,
}

impl Config {
    pub fn from_matches(args: &ArgMatches) -> Config {
        Config {
            paths: args
                .values_of("include")
                .map(|paths| paths.map(PathBuf::from).collect())
                .unwrap_or_default(),
            style: args.value_of("style").map(str::to_owned),
            debug: args.is_present("debug"),
            parse_only: args.is_present("parse"),
            read_serialized: args.is_present("read"),
            write_serialized: args.value_of("write").map(PathBuf::from),
            interpret: args.is_present("interpret"),
            inputs: args
                .values_of("INPUT")
                .map(|inputs| inputs.map(PathBuf::from).collect())
                .unwrap_or_default(),
        }
    }
}
