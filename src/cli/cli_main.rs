use crate::config::Config;
use lang::{codegen::source, serial, Session};
use std::fs::{self, File};

/// Run every input file through the session: parse (or deserialize),
/// evaluate, print the result tree. Exit code 0 on success, 1 when errors
/// were reported, 2 on invocation problems.
pub fn cli_main(config: Config) -> i32 {
    if config.inputs.is_empty() {
        eprintln!("elfe: no input files");
        return 2;
    }

    let mut session = match &config.style {
        Some(style) => Session::with_style(style, config.paths.clone()),
        None => {
            let mut session = Session::new();
            session.paths = config.paths.clone();
            session
        }
    };
    session.set_debug(config.debug);
    if config.interpret {
        session.interpreter.backend = None;
    }

    for input in &config.inputs {
        let tree = if config.read_serialized {
            let mut file = match File::open(input) {
                Ok(file) => file,
                Err(error) => {
                    eprintln!("elfe: cannot open {}: {}", input.display(), error);
                    return 2;
                }
            };
            match serial::deserialize(&mut file) {
                Ok(tree) => Some(tree),
                Err(error) => {
                    eprintln!("elfe: cannot read tree {}: {}", input.display(), error);
                    return 2;
                }
            }
        } else {
            let text = match fs::read_to_string(input) {
                Ok(text) => text,
                Err(error) => {
                    eprintln!("elfe: cannot read {}: {}", input.display(), error);
                    return 2;
                }
            };
            session.parse_source(&input.to_string_lossy(), &text)
        };

        let tree = match tree {
            Some(tree) => tree,
            None => continue,
        };

        if let Some(out) = &config.write_serialized {
            let mut file = match File::create(out) {
                Ok(file) => file,
                Err(error) => {
                    eprintln!("elfe: cannot create {}: {}", out.display(), error);
                    return 2;
                }
            };
            if let Err(error) = serial::serialize(&tree, &mut file) {
                eprintln!("elfe: cannot write tree {}: {}", out.display(), error);
                return 2;
            }
            continue;
        }

        if config.parse_only {
            println!("{}", source::render(&tree));
            continue;
        }

        let result = session.evaluate(&tree);
        println!("{}", source::render(&result));
    }

    if session.had_errors() {
        session.display_errors();
        return 1;
    }
    0
}
