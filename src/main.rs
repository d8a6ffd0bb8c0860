mod cli;
mod config;

use clap::App;

fn main() {
    let args = App::new("elfe")
        .version("0.1.0")
        .about("A tree-rewriting programming language")
        .args_from_usage(
            "-I, --include=[PATH]...  'Add a directory to the syntax search path'
            -s, --style=[FILE]        'Load an alternate syntax file'
            -g, --debug               'Trace evaluation steps'
            -p, --parse               'Stop after parsing, print the tree'
            -r, --read                'Read input files as serialized trees'
            -w, --write=[FILE]        'Write the parsed tree in serialized form'
            -i, --interpret           'Force the interpreter, never use a backend'
            [INPUT]...                'Source files to process'",
        )
        .get_matches();

    let config = config::Config::from_matches(&args);
    std::process::exit(cli::cli_main::cli_main(config));
}
