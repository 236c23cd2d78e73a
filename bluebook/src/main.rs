use std::{path::PathBuf, process};

use bluebook::{
    Devices, InterpreterSettings, MemorySettings, Statistics, StopReason, TABLE_GROW_SIZE,
    TABLE_MAX_SIZE, TABLE_MIN_SIZE, VMCreateInfo, boot,
};
use clap::Parser as ClapParser;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(help = "The image file to run")]
    image: PathBuf,

    #[arg(long, help = "Stop after this many bytecodes")]
    max_steps: Option<u64>,

    #[arg(long, default_value_t = TABLE_MAX_SIZE, help = "Largest object table")]
    table_max: usize,

    #[arg(long, default_value_t = TABLE_MIN_SIZE, help = "Initial object table")]
    table_min: usize,

    #[arg(long, help = "Print interpreter statistics on exit")]
    stats: bool,
}

fn print_statistics(stats: &Statistics) {
    println!("bytecodes:          {}", stats.bytecodes);
    println!("sends:              {}", stats.sends);
    println!(
        "method cache:       {} hits, {} misses",
        stats.method_cache_hits, stats.method_cache_misses
    );
    println!("doesNotUnderstand:  {}", stats.does_not_understand);
    println!("primitive failures: {}", stats.primitive_failures);
    println!(
        "contexts:           {} allocated, {} recycled",
        stats.contexts_allocated, stats.contexts_recycled
    );
    println!("process switches:   {}", stats.process_switches);
    println!(
        "reclamations:       {} ({} objects freed)",
        stats.reclamations, stats.objects_reclaimed
    );
    println!(
        "object table:       {} live of {}",
        stats.live_objects, stats.table_capacity
    );
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let info = VMCreateInfo {
        image: cli.image.clone(),
        memory: MemorySettings {
            table_min: cli.table_min,
            table_grow: TABLE_GROW_SIZE,
            table_max: cli.table_max,
        },
        interpreter: InterpreterSettings::default(),
    };
    let mut vm = match boot(info, Devices::headless()) {
        Ok(vm) => vm,
        Err(err) => {
            eprintln!("Error loading image '{}': {}", cli.image.display(), err);
            process::exit(1);
        }
    };

    let outcome = vm.run(cli.max_steps);
    if cli.stats {
        print_statistics(&vm.statistics());
    }
    match outcome {
        Ok(StopReason::Quit) => log::info!("image quit"),
        Ok(StopReason::StepLimit) => {
            println!("stopped after {} bytecodes", vm.statistics().bytecodes)
        }
        Err(err) => {
            eprintln!("fatal: {err}");
            process::exit(1);
        }
    }
}
