use std::process::ExitCode;

fn main() -> ExitCode {
    slackbot_cli::run()
}
