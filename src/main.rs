fn main() {
    if let Err(err) = report_ingest::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
