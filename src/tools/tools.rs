//! CLI entry point (spec §6). Mirrors the teacher's `tools.rs`
//! `Args`/`Operation` split, adapted to this crate's single-pipeline shape:
//! one input is loaded, lifted, and analyzed, with each output (`--dump-ir`,
//! `--dump-cfg`, `--debug`) an independent flag over that one run rather
//! than a subcommand choosing between unrelated dumps.

mod analyze_reg_src;
mod dump_cfg;
mod dump_ir;

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, ensure, Context, Result};
use clap::{CommandFactory, Parser};

use liftgraph::arch::Architecture;
use liftgraph::elf;
use liftgraph::lifter::LiftFlags;
use liftgraph::render::RenderSettings;
use liftgraph::request::{self, RequestOptions};

use analyze_reg_src::parse_source_query;
use dump_cfg::dump_cfg;
use dump_ir::dump_ir;

/// Lift a region of machine code and run static analyses over it.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// input file; omit when reading from stdin with --bytes
    file: Option<PathBuf>,

    /// raw byte offset into `file` (hex), used with --length
    #[arg(long, value_parser = parse_hex_u64)]
    offset: Option<u64>,
    /// byte length of the raw slice, used with --offset
    #[arg(long)]
    length: Option<u64>,
    /// ELF section name to load
    #[arg(long)]
    section: Option<String>,
    /// ELF symbol name to load
    #[arg(long)]
    function: Option<String>,
    /// read up to 1 MiB of bytes from standard input instead of `file`
    #[arg(long)]
    bytes: bool,

    /// architecture name; required for --bytes and --offset/--length
    #[arg(short, long, value_enum)]
    arch: Option<Architecture>,

    /// emit the lifted IR textually, one instruction per line
    #[arg(short = 'i', long)]
    dump_ir: bool,
    /// emit the annotated CFG to file <out> in a graph-rendering format
    #[arg(short = 'c', long, value_name = "OUT")]
    dump_cfg: Option<PathBuf>,
    /// run the max-stack fixpoint and include per-instruction r/w annotations
    #[arg(short = 'm', long)]
    analyze_max_stack: bool,
    /// run the source-tree analysis: <hex-addr>:<ir-offset>:<operand-index>
    #[arg(short = 'r', long, value_name = "ADDR:OFFSET:OPERAND")]
    analyze_reg_src: Option<String>,
    /// set lifter flag `optimize`
    #[arg(short = 'p', long)]
    optimize: bool,
    /// set lifter flag `helper_to_tcg` (experimental)
    #[arg(short = 't', long)]
    h2tcg: bool,
    /// print arena usage after the run
    #[arg(short = 'd', long)]
    debug: bool,
    /// emit dashed (rather than solid) fallthrough edges in --dump-cfg
    #[arg(long)]
    dashed_fallthrough: bool,
}

fn parse_hex_u64(raw: &str) -> Result<u64, std::num::ParseIntError> {
    let trimmed = raw.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(trimmed, 16)
}

const MAX_STDIN_BYTES: usize = 1024 * 1024;

struct InputRegion {
    bytes: Vec<u8>,
    guest_addr: u64,
    arch: Architecture,
}

fn load_input(args: &Args) -> Result<InputRegion> {
    if args.bytes {
        ensure!(args.file.is_none(), "--bytes is mutually exclusive with a positional input file");
        let arch = args.arch.ok_or_else(|| anyhow!("--arch is required with --bytes"))?;
        let mut buf = Vec::new();
        std::io::stdin()
            .take(MAX_STDIN_BYTES as u64)
            .read_to_end(&mut buf)
            .context("reading stdin")?;
        return Ok(InputRegion { bytes: buf, guest_addr: 0, arch });
    }

    let file = args.file.as_ref().ok_or_else(|| anyhow!("an input file is required unless --bytes is given"))?;

    let region = if let Some(section) = &args.section {
        elf::load_section(file, section)?
    } else if let Some(function) = &args.function {
        elf::load_function(file, function)?
    } else if let (Some(offset), Some(length)) = (args.offset, args.length) {
        elf::load_offset(file, offset, length)?
    } else {
        return Err(anyhow!("one of --offset/--length, --section, or --function is required"));
    };

    let arch = args.arch.or(region.architecture).ok_or_else(|| anyhow!("could not infer an architecture; pass --arch explicitly"))?;
    Ok(InputRegion {
        bytes: region.bytes,
        guest_addr: region.guest_addr,
        arch,
    })
}

fn run(args: Args) -> Result<()> {
    let input = load_input(&args)?;

    let mut lift_flags = LiftFlags::EMPTY;
    if args.optimize {
        lift_flags = lift_flags.union(LiftFlags::from_raw(liftgraph::lifter::OPTIMIZE));
    }
    if args.h2tcg {
        lift_flags = lift_flags.union(LiftFlags::from_raw(liftgraph::lifter::HELPER_TO_TCG));
    }

    let source_query = args.analyze_reg_src.as_deref().map(parse_source_query).transpose()?;

    let options = RequestOptions {
        lift_flags,
        run_max_stack: args.analyze_max_stack,
        source_query,
    };

    let analyzed = request::run(input.arch, input.guest_addr, &input.bytes, options)?;

    if args.dump_ir {
        print!("{}", dump_ir(&analyzed.graph));
    }

    if let Some(out) = &args.dump_cfg {
        let settings = RenderSettings {
            dashed_fallthrough_edges: args.dashed_fallthrough,
            show_max_stack: args.analyze_max_stack,
        };
        dump_cfg(&analyzed.graph, settings, out)?;
    }

    if args.debug {
        let stats = analyzed.graph.arena_stats();
        eprintln!("block arena: {} entries", stats.len);
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("error: {err:#}");
        let _ = Args::command().print_help();
        println!();
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
