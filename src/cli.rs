// Command-line front end for gitdelta.
//
// Subcommands: apply a delta to a base, print a delta's header, list its
// instructions, and print build configuration.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::apply::{self, Compression, DEFAULT_CHUNK_SIZE, DeltaPatcher};
use crate::delta::{DeltaError, Instructions};
use crate::io::StagedOutput;

const BUF_SIZE: usize = 64 * 1024;

/// Largest output chunk accepted on the command line.
const MAX_CHUNK_SIZE: u64 = 1 << 30; // 1 GiB

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Git binary delta applier.
#[derive(Parser, Debug)]
#[command(
    name = "gitdelta",
    version,
    about = "Apply and inspect Git binary deltas",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Apply a delta to a base file.
    Apply(ApplyArgs),
    /// Print the declared base and result sizes of a delta.
    Header(PrintArgs),
    /// Print a delta's header and every instruction.
    Delta(PrintArgs),
    /// Print build/configuration details.
    Config,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Base file the delta copies from (default: empty base).
    #[arg(long, short = 's', value_hint = ValueHint::FilePath)]
    base: Option<PathBuf>,

    /// Input delta file (default: stdin).
    #[arg(long, value_hint = ValueHint::FilePath, conflicts_with = "input_pos")]
    input: Option<PathBuf>,

    /// Output file (default: stdout).
    #[arg(long, value_hint = ValueHint::FilePath, conflicts_with = "output_pos")]
    output: Option<PathBuf>,

    /// Write output to stdout.
    #[arg(short = 'c', long)]
    stdout: bool,

    /// Check only (do not write output).
    #[arg(long = "check-only")]
    no_output: bool,

    /// Delta input is zlib-compressed.
    #[arg(long)]
    zlib: bool,

    /// Output bytes produced per step (supports K/M/G suffix).
    #[arg(long = "chunk-size", value_parser = parse_byte_size, default_value_t = DEFAULT_CHUNK_SIZE as u64)]
    chunk_size: u64,

    /// Input file (positional form).
    #[arg(value_hint = ValueHint::FilePath)]
    input_pos: Option<PathBuf>,

    /// Output file (positional form).
    #[arg(value_hint = ValueHint::FilePath)]
    output_pos: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PrintArgs {
    /// Delta input file.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Delta input is zlib-compressed.
    #[arg(long)]
    zlib: bool,
}

// ---------------------------------------------------------------------------
// Resolved command + options (flattened from Cli)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Apply,
    PrintHeader,
    PrintDelta,
    Config,
}

struct Options {
    command: Command,
    use_stdout: bool,
    force: bool,
    quiet: bool,
    verbose: u8,
    no_output: bool,
    zlib: bool,
    chunk_size: u64,
    base_file: Option<PathBuf>,
    input_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
    json_output: bool,
}

impl Options {
    fn new(command: Command, cli: &Cli) -> Self {
        Self {
            command,
            use_stdout: false,
            force: cli.force,
            quiet: cli.quiet,
            verbose: cli.verbose.min(2),
            no_output: false,
            zlib: false,
            chunk_size: DEFAULT_CHUNK_SIZE as u64,
            base_file: None,
            input_file: None,
            output_file: None,
            json_output: cli.json_output,
        }
    }

    fn compression(&self) -> Result<Compression, String> {
        if !self.zlib {
            return Ok(Compression::None);
        }
        #[cfg(feature = "zlib")]
        return Ok(Compression::Zlib);
        #[cfg(not(feature = "zlib"))]
        return Err("zlib support not enabled. Rebuild with `--features zlib`.".into());
    }
}

fn resolve_options(cli: Cli) -> Options {
    let command = match cli.command {
        Cmd::Apply(_) => Command::Apply,
        Cmd::Header(_) => Command::PrintHeader,
        Cmd::Delta(_) => Command::PrintDelta,
        Cmd::Config => Command::Config,
    };
    let mut opts = Options::new(command, &cli);

    match cli.command {
        Cmd::Apply(args) => {
            opts.use_stdout = args.stdout;
            opts.no_output = args.no_output;
            opts.zlib = args.zlib;
            opts.chunk_size = args.chunk_size;
            opts.base_file = args.base;
            opts.input_file = args.input.or(args.input_pos);
            opts.output_file = args.output.or(args.output_pos);
        }
        Cmd::Header(args) | Cmd::Delta(args) => {
            opts.zlib = args.zlib;
            opts.input_file = Some(args.input);
        }
        Cmd::Config => {}
    }
    opts
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("gitdelta".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let _ = resolve_options(cli);
    }
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("gitdelta version {version} (Rust)");

    let zlib = cfg!(feature = "zlib") as u8;
    let file_io = cfg!(feature = "file-io") as u8;
    let ptr_size = std::mem::size_of::<*const ()>();

    eprintln!("ZLIB={zlib}");
    eprintln!("FILE_IO={file_io}");
    eprintln!("DEFAULT_CHUNK_SIZE={DEFAULT_CHUNK_SIZE}");
    eprintln!("MAX_CHUNK_SIZE={MAX_CHUNK_SIZE}");
    eprintln!("sizeof(usize)={ptr_size}");

    0
}

// ---------------------------------------------------------------------------
// Apply command
// ---------------------------------------------------------------------------

fn cmd_apply(opts: &Options) -> i32 {
    let compression = match opts.compression() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("gitdelta: {e}");
            return 1;
        }
    };

    let base = match &opts.base_file {
        Some(path) => match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("gitdelta: base file: {}: {e}", path.display());
                return 1;
            }
        },
        None => Vec::new(),
    };

    let delta_reader: Box<dyn Read> = match &opts.input_file {
        Some(path) => match File::open(path) {
            Ok(f) => Box::new(BufReader::with_capacity(BUF_SIZE, f)),
            Err(e) => {
                eprintln!("gitdelta: input file: {}: {e}", path.display());
                return 1;
            }
        },
        None => Box::new(BufReader::new(io::stdin())),
    };
    let delta_reader = apply::delta_source(delta_reader, compression);

    let output_path = match &opts.output_file {
        Some(path) if !opts.use_stdout && !opts.no_output => {
            if path.exists() && !opts.force {
                eprintln!(
                    "gitdelta: output file exists, use -f to overwrite: {}",
                    path.display()
                );
                return 1;
            }
            Some(path)
        }
        _ => None,
    };

    // The header is checked against the base before any output is opened.
    let mut patcher =
        match DeltaPatcher::with_chunk_size(&base, delta_reader, opts.chunk_size as usize) {
            Ok(p) => p,
            Err(e) => return apply_failed(opts, &e),
        };

    let mut output = if opts.no_output {
        Output::Stream(Box::new(io::sink()))
    } else if let Some(path) = output_path {
        match StagedOutput::create(path) {
            Ok(staged) => Output::File(staged),
            Err(e) => {
                eprintln!("gitdelta: output file: {}: {e}", path.display());
                return 1;
            }
        }
    } else {
        Output::Stream(Box::new(BufWriter::with_capacity(
            BUF_SIZE,
            io::stdout().lock(),
        )))
    };

    let total = match patcher.patch_to(&mut output) {
        Ok(total) => total,
        Err(e) => return apply_failed(opts, &e),
    };

    if let Err(e) = output.finish() {
        eprintln!("gitdelta: write error: {e}");
        return 1;
    }

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "gitdelta: base size: {}, output size: {total}, fills: {}",
            base.len(),
            patcher.fill_calls()
        );
    }

    if opts.json_output {
        let json = serde_json::json!({
            "command": "apply",
            "base_size": base.len(),
            "output_size": total,
            "fill_calls": patcher.fill_calls(),
            "fully_consumed": patcher.is_fully_consumed(),
        });
        match serde_json::to_string_pretty(&json) {
            Ok(s) => eprintln!("{s}"),
            Err(e) => eprintln!("gitdelta: json: {e}"),
        }
    }

    0
}

/// Report a failed apply on stderr (and as JSON with `--json`).
fn apply_failed(opts: &Options, e: &DeltaError) -> i32 {
    eprintln!("gitdelta: apply error: {e}");
    if opts.json_output {
        let json = serde_json::json!({
            "command": "apply",
            "error": e.to_string(),
            "corrupt_delta": e.is_corruption(),
        });
        match serde_json::to_string_pretty(&json) {
            Ok(s) => eprintln!("{s}"),
            Err(e) => eprintln!("gitdelta: json: {e}"),
        }
    }
    1
}

/// Where `apply` writes: a staged file replaced only on success, or a
/// stream (stdout, or a sink for `--check-only`).
enum Output {
    File(StagedOutput),
    Stream(Box<dyn Write>),
}

impl Output {
    fn finish(self) -> io::Result<()> {
        match self {
            Output::File(staged) => staged.commit(),
            Output::Stream(mut w) => w.flush(),
        }
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::File(staged) => staged.write(buf),
            Output::Stream(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::File(staged) => staged.flush(),
            Output::Stream(w) => w.flush(),
        }
    }
}

// ---------------------------------------------------------------------------
// Print commands (header, delta)
// ---------------------------------------------------------------------------

fn cmd_print(opts: &Options) -> i32 {
    let Some(input_file) = &opts.input_file else {
        eprintln!("gitdelta: print commands require an input file");
        return 1;
    };

    let compression = match opts.compression() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("gitdelta: {e}");
            return 1;
        }
    };

    let file = match File::open(input_file) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("gitdelta: {}: {e}", input_file.display());
            return 1;
        }
    };
    let reader = apply::delta_source(BufReader::with_capacity(BUF_SIZE, file), compression);

    let mut insts = match Instructions::new(reader) {
        Ok(it) => it,
        Err(e) => {
            eprintln!("gitdelta: invalid delta header: {e}");
            return 1;
        }
    };
    let header = *insts.header();

    println!("delta base size:    {}", header.base_size);
    println!("delta result size:  {}", header.result_size);

    let mut count: u64 = 0;
    if opts.command == Command::PrintDelta {
        println!("  Offset  Instruction");
        loop {
            let position = insts.produced();
            match insts.next() {
                Some(Ok(inst)) => {
                    println!("{position:08}  {inst}");
                    count += 1;
                }
                Some(Err(e)) => {
                    eprintln!("gitdelta: instruction {count}: {e}");
                    return 1;
                }
                None => break,
            }
        }
    }

    if opts.json_output {
        let name = if opts.command == Command::PrintDelta {
            "delta"
        } else {
            "header"
        };
        let mut json = serde_json::json!({
            "command": name,
            "base_size": header.base_size,
            "result_size": header.result_size,
        });
        if opts.command == Command::PrintDelta {
            json["instructions"] = serde_json::json!(count);
        }
        match serde_json::to_string_pretty(&json) {
            Ok(s) => eprintln!("{s}"),
            Err(e) => eprintln!("gitdelta: json: {e}"),
        }
    }

    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();
    let mut opts = resolve_options(cli);

    if opts.chunk_size == 0 || opts.chunk_size > MAX_CHUNK_SIZE {
        eprintln!(
            "gitdelta: --chunk-size: {} must be between 1 and {MAX_CHUNK_SIZE}",
            opts.chunk_size
        );
        process::exit(1);
    }

    // Warn if -c overrides output filename.
    if opts.use_stdout
        && let Some(path) = opts.output_file.take()
        && !opts.quiet
    {
        eprintln!(
            "gitdelta: warning: -c option overrides output filename: {}",
            path.display()
        );
    }

    let exit_code = match opts.command {
        Command::Apply => cmd_apply(&opts),
        Command::PrintHeader | Command::PrintDelta => cmd_print(&opts),
        Command::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_opts(args: &[&str]) -> Options {
        let argv: Vec<String> = std::iter::once("gitdelta".to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect();
        let cli = Cli::try_parse_from(argv).expect("cli parse failed");
        resolve_options(cli)
    }

    #[test]
    fn parse_byte_size_suffixes() {
        assert_eq!(parse_byte_size("1").unwrap(), 1);
        assert_eq!(parse_byte_size("2K").unwrap(), 2 * 1024);
        assert_eq!(parse_byte_size("3m").unwrap(), 3 * 1024 * 1024);
        assert_eq!(parse_byte_size("4G").unwrap(), 4 * 1024 * 1024 * 1024);
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("12Q").is_err());
    }

    #[test]
    fn apply_subcommand_maps_correctly() {
        let opts = parse_opts(&[
            "apply",
            "--base",
            "base.bin",
            "--chunk-size",
            "4K",
            "--zlib",
            "in.delta",
            "out.bin",
        ]);
        assert_eq!(opts.command, Command::Apply);
        assert_eq!(opts.chunk_size, 4096);
        assert!(opts.zlib);
        assert_eq!(
            opts.base_file.as_deref(),
            Some(std::path::Path::new("base.bin"))
        );
        assert_eq!(opts.input_file, Some(PathBuf::from("in.delta")));
        assert_eq!(opts.output_file, Some(PathBuf::from("out.bin")));
    }

    #[test]
    fn apply_defaults() {
        let opts = parse_opts(&["apply"]);
        assert_eq!(opts.chunk_size, DEFAULT_CHUNK_SIZE as u64);
        assert!(!opts.zlib);
        assert!(opts.base_file.is_none());
        assert!(opts.input_file.is_none());
        assert!(matches!(opts.compression(), Ok(Compression::None)));
    }

    #[test]
    fn check_only_and_quiet() {
        let opts = parse_opts(&["--quiet", "apply", "-s", "b", "--check-only", "in"]);
        assert!(opts.no_output);
        assert!(opts.quiet);
        assert_eq!(opts.input_file, Some(PathBuf::from("in")));
    }

    #[test]
    fn global_stdio_and_force_flags() {
        let opts = parse_opts(&["--force", "apply", "--stdout", "in", "out"]);
        assert!(opts.use_stdout);
        assert!(opts.force);
    }

    #[test]
    fn verbose_is_capped() {
        let verbose = parse_opts(&["--verbose", "--verbose", "--verbose", "apply", "in"]);
        assert_eq!(verbose.verbose, 2);
    }

    #[test]
    fn print_commands_map() {
        let header = parse_opts(&["header", "in"]);
        assert_eq!(header.command, Command::PrintHeader);
        assert_eq!(header.input_file, Some(PathBuf::from("in")));

        let delta = parse_opts(&["--json", "delta", "--zlib", "in"]);
        assert_eq!(delta.command, Command::PrintDelta);
        assert!(delta.zlib);
        assert!(delta.json_output);
    }

    #[test]
    fn config_command_maps() {
        assert_eq!(parse_opts(&["config"]).command, Command::Config);
    }
}
