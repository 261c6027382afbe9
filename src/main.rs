fn main() {
    #[cfg(feature = "cli")]
    gitdelta::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("gitdelta: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
