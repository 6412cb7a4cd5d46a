use std::io::Write;

use clap::Parser;

use cryptainer::cli::{render_error, run, Cli};

fn main() {
    let cli = Cli::parse();
    let error_format = cli.error_format;
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            let stderr = std::io::stderr();
            let mut handle = stderr.lock();
            let _ = writeln!(handle, "{}", render_error(&error, error_format));
            let _ = handle.flush();
            std::process::exit(1);
        }
    }
}
