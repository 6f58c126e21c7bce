//! tickvm CLI: assemble, inspect and run scripts.
//!
//! Exit codes:
//! - 0: Success
//! - 1: Input/decode/assembly/snapshot error
//! - 3: Fatal VM error

mod commands;

use std::process;

fn main() {
    pretty_env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "assemble" => commands::assemble(&args[2..]),
        "disassemble" => commands::disassemble(&args[2..]),
        "run" => commands::run(&args[2..]),
        "resume" => commands::resume(&args[2..]),
        "--help" | "-h" | "help" => {
            print_usage();
            process::exit(0);
        }
        other => {
            eprintln!("error: unknown command '{other}'");
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    if let Err(code) = result {
        process::exit(code);
    }
}

fn print_usage() {
    eprintln!("Usage: tickvm <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  assemble <input.tks> [-o output.tkb]     Assemble text to a script image");
    eprintln!("  disassemble <input.tkb>                  Disassemble an image to text");
    eprintln!("  run <input.tkb> [options]                Start a function and tick the VM");
    eprintln!("  resume <input.tkb> <snapshot> [options]  Restore a snapshot and keep ticking");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --entry ID       Function to start (run only, default 0)");
    eprintln!("  --ticks N        Stop after N ticks (default: until no thread can progress)");
    eprintln!("  --globals N      Global variable slots (default 256)");
    eprintln!("  --max-depth N    Call depth limit (default 1024)");
    eprintln!("  --save PATH      Write a snapshot when the run stops");
    eprintln!();
    eprintln!("Set RUST_LOG=debug (or trace) to follow execution.");
}
