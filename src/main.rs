use std::env;
use std::process::ExitCode;
use visor::pipeline::DirectorySink;
use visor::{ImageFileCapture, LoggingInjector, Pipeline};

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 3 {
        eprintln!("usage: visor <pipeline.json> <entry> <screenshot> [resource_dir]");
        return ExitCode::FAILURE;
    }

    let capture = ImageFileCapture::new(&args[2]);
    let mut pipeline = Pipeline::new(Box::new(capture), Box::new(LoggingInjector))
        .with_diagnostics(Box::new(DirectorySink::new("log")));
    if let Some(dir) = args.get(3) {
        pipeline = pipeline.with_resource_dir(dir);
    }

    if let Err(e) = pipeline.load_from_json_file(&args[0]) {
        eprintln!("failed to load pipeline: {e:#}");
        return ExitCode::FAILURE;
    }

    let result = pipeline.run(&args[1]);
    match result.to_json() {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to serialize result: {e}"),
    }

    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
