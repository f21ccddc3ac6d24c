fn main() {
    if let Err(err) = rowcodec::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
