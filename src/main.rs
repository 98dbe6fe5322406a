use std::process;

fn main() {
    if let Err(e) = tottertalk::cli::run_cli() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
