//! CLI command implementations.

use std::fs;
use std::str::FromStr;

use log::{debug, info};
use tickvm::{
    Arity, BuiltinRegistry, FrameState, NullHost, Scheduler, Thread, Verdict, VmConfig,
};
use tickvm_common::ScriptImage;

/// Id of the `print` built-in the command line host provides.
pub const PRINT_BUILTIN: u32 = 1000;

/// Assemble a .tks text file to a .tkb image.
pub fn assemble(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: assemble requires an input file");
        eprintln!("Usage: tickvm assemble <input.tks> [-o output.tkb]");
        return Err(1);
    }

    let input = &args[0];

    let output = if args.len() >= 3 && args[1] == "-o" {
        args[2].clone()
    } else if let Some(stem) = input.strip_suffix(".tks") {
        format!("{stem}.tkb")
    } else {
        format!("{input}.tkb")
    };

    let text = fs::read_to_string(input).map_err(|e| {
        eprintln!("error: cannot read '{input}': {e}");
        1
    })?;

    let image = tickvm_assembler::assemble(&text).map_err(|e| {
        eprintln!("error: {e}");
        1
    })?;

    let bytes = image.encode();
    fs::write(&output, &bytes).map_err(|e| {
        eprintln!("error: cannot write '{output}': {e}");
        1
    })?;

    eprintln!(
        "assembled {} function(s), {} string(s) ({} bytes) -> {output}",
        image.functions.len(),
        image.strings.len(),
        bytes.len()
    );
    Ok(())
}

/// Disassemble a .tkb image to text.
pub fn disassemble(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: disassemble requires an input file");
        eprintln!("Usage: tickvm disassemble <input.tkb>");
        return Err(1);
    }

    let image = read_image(&args[0])?;
    print!("{}", tickvm_assembler::disassemble(&image));
    Ok(())
}

/// Start the entry function and tick until the run stops.
pub fn run(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: run requires an input file");
        eprintln!("Usage: tickvm run <input.tkb> [--entry ID] [--ticks N] [--save PATH]");
        return Err(1);
    }

    let image = read_image(&args[0])?;
    let options = RunOptions::parse(&args[1..], true)?;
    let mut vm = scheduler(image, &options);

    vm.start(options.entry, Vec::new()).map_err(|e| {
        eprintln!("error: cannot start function {}: {e}", options.entry);
        1
    })?;

    drive(&mut vm, &options)
}

/// Restore a snapshot over an image and keep ticking.
pub fn resume(args: &[String]) -> Result<(), i32> {
    if args.len() < 2 {
        eprintln!("error: resume requires an image and a snapshot");
        eprintln!("Usage: tickvm resume <input.tkb> <snapshot> [--ticks N] [--save PATH]");
        return Err(1);
    }

    let image = read_image(&args[0])?;
    let snapshot = &args[1];
    let options = RunOptions::parse(&args[2..], false)?;
    let mut vm = scheduler(image, &options);

    let bytes = fs::read(snapshot).map_err(|e| {
        eprintln!("error: cannot read '{snapshot}': {e}");
        1
    })?;
    vm.restore_snapshot(&bytes).map_err(|e| {
        eprintln!("error: cannot restore '{snapshot}': {e}");
        1
    })?;
    info!("restored {} thread(s) from {snapshot}", vm.threads().count());

    drive(&mut vm, &options)
}

// ---- Helpers ----

/// Read and decode a .tkb image.
fn read_image(path: &str) -> Result<ScriptImage, i32> {
    let bytes = fs::read(path).map_err(|e| {
        eprintln!("error: cannot read '{path}': {e}");
        1
    })?;

    ScriptImage::decode(&bytes).map_err(|e| {
        eprintln!("error: invalid image: {e}");
        1
    })
}

/// Flags shared by `run` and `resume`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RunOptions {
    entry: u32,
    ticks: Option<u64>,
    config: VmConfig,
    save: Option<String>,
}

impl RunOptions {
    fn parse(args: &[String], allow_entry: bool) -> Result<Self, i32> {
        let mut options = RunOptions {
            entry: 0,
            ticks: None,
            config: VmConfig::default(),
            save: None,
        };
        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let Some(value) = args.get(i + 1) else {
                eprintln!("error: {flag} requires a value");
                return Err(1);
            };
            match flag {
                "--entry" if allow_entry => options.entry = parse_value(flag, value)?,
                "--ticks" => options.ticks = Some(parse_value(flag, value)?),
                "--globals" => options.config.globals = parse_value(flag, value)?,
                "--max-depth" => options.config.max_call_depth = parse_value(flag, value)?,
                "--save" => options.save = Some(value.clone()),
                _ => {
                    eprintln!("error: unexpected argument '{flag}'");
                    return Err(1);
                }
            }
            i += 2;
        }
        Ok(options)
    }
}

fn parse_value<T: FromStr>(flag: &str, value: &str) -> Result<T, i32> {
    value.parse().map_err(|_| {
        eprintln!("error: invalid value '{value}' for {flag}");
        1
    })
}

/// A scheduler over `image` with the core library and `print`.
fn scheduler(image: ScriptImage, options: &RunOptions) -> Scheduler {
    let mut builtins = BuiltinRegistry::with_core();
    builtins.register(PRINT_BUILTIN, "print", Arity::Fixed(1), |call| {
        let line = call.pop_text()?;
        println!("{line}");
        Ok(Verdict::Continue)
    });
    Scheduler::new(image, builtins, NullHost, options.config)
}

/// Whether a tick could move this thread forward without outside help.
fn can_progress(thread: &Thread) -> bool {
    let frame = thread.current();
    frame.state == FrameState::Runnable && !frame.is_frozen()
}

/// Tick until the tick limit, or until no thread can progress, then save
/// if asked.
fn drive(vm: &mut Scheduler, options: &RunOptions) -> Result<(), i32> {
    let mut ticks = 0u64;
    loop {
        if options.ticks.is_some_and(|limit| ticks >= limit) {
            break;
        }
        if !vm.threads().any(can_progress) {
            break;
        }
        let report = vm.tick().map_err(|e| {
            eprintln!("fatal: {e}");
            3
        })?;
        ticks += 1;
        debug!("tick {ticks}: ran {:?}", report.ran);

        for done in &report.finished {
            match done.state {
                FrameState::Aborted => println!("thread {} aborted", done.thread),
                _ => println!(
                    "thread {} finished: {}",
                    done.thread,
                    vm.runtime().text_of(&done.value)
                ),
            }
        }
    }

    let live = vm.threads().count();
    if live > 0 {
        eprintln!("stopped after {ticks} tick(s) with {live} live thread(s)");
    }

    if let Some(path) = &options.save {
        let bytes = vm.save_snapshot();
        fs::write(path, &bytes).map_err(|e| {
            eprintln!("error: cannot write '{path}': {e}");
            1
        })?;
        eprintln!("saved snapshot ({} bytes) -> {path}", bytes.len());
    }
    Ok(())
}
