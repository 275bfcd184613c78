use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    docsor::core::trace::init();
    Ok(docsor::run()?)
}
