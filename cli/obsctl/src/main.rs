use clap::Parser;
use obsctl::CliArgs;

fn main() {
    let args = CliArgs::parse();
    if let Err(err) = obsctl::run(args) {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
