use std::process::ExitCode;

fn main() -> ExitCode {
    consult_cli::run()
}
