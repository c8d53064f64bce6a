use std::process::ExitCode;

fn main() -> ExitCode {
    medidesk_cli::run()
}
