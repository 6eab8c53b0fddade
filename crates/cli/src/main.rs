use std::process::ExitCode;

fn main() -> ExitCode {
    bastion_cli::run()
}
