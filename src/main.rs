fn main() {
    if let Err(err) = mapping_executor::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
