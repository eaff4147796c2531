use cellheap::logging;
use cellheap::{Core, FieldAccess, HeapConfig, StructRef};
use std::path::PathBuf;
use tracing::info;

const NEXT: u32 = 1;
const VALUE: u32 = 2;

#[derive(Debug)]
struct Config {
    objects: usize,
    keep_every: usize,
    config_path: Option<PathBuf>,
    json: bool,
}

impl Config {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = std::env::args().collect();
        let prog = args.first().map(String::as_str).unwrap_or("cellheap");

        let mut config = Self {
            objects: 100_000,
            keep_every: 10,
            config_path: None,
            json: false,
        };

        let mut rest = args.iter().skip(1);
        while let Some(arg) = rest.next() {
            match arg.as_str() {
                "--help" | "-h" => return Err(Self::usage(prog)),
                "--json" => config.json = true,
                "--objects" => config.objects = Self::number(arg, rest.next())?,
                "--keep-every" => config.keep_every = Self::number(arg, rest.next())?.max(1),
                "--config" => {
                    let path = rest.next().ok_or_else(|| format!("{} needs a path", arg))?;
                    config.config_path = Some(PathBuf::from(path));
                }
                opt => return Err(format!("Unknown option: {}\n\n{}", opt, Self::usage(prog))),
            }
        }

        Ok(config)
    }

    fn number(flag: &str, value: Option<&String>) -> Result<usize, String> {
        let value = value.ok_or_else(|| format!("{} needs a value", flag))?;
        value.parse().map_err(|_| format!("{} expects a number, got '{}'", flag, value))
    }

    fn usage(prog: &str) -> String {
        format!(
            "cellheap - allocation workload against one VM core\n\n\
            USAGE:\n    {} [OPTIONS]\n\n\
            OPTIONS:\n    \
            -h, --help           Print help information\n    \
            --objects <N>        Structs to allocate (default 100000)\n    \
            --keep-every <K>     Link every Kth struct into a live chain (default 10)\n    \
            --config <PATH>      Heap configuration file (default: discover cellheap.toml)\n    \
            --json               Print statistics as JSON",
            prog
        )
    }
}

fn run(config: &Config) -> Result<usize, Box<dyn std::error::Error>> {
    let heap_config = match &config.config_path {
        Some(path) => HeapConfig::load(path)?,
        None => HeapConfig::discover(),
    };
    let mut core = Core::new(0, heap_config)?;

    for i in 0..config.objects {
        let object = core.allocate_struct(2, 16)?;
        object.define_field(core.heap_mut(), NEXT, 0, true)?;
        object.define_field(core.heap_mut(), VALUE, 8, false)?;
        object.write_field(core.heap_mut(), VALUE, i as u64)?;

        if i % config.keep_every == 0 {
            let head = core.frame().get(0) as usize;
            object.write_pointer_field(core.heap_mut(), NEXT, head)?;
            core.frame_mut().set_ptr(0, object.address());
        }
    }

    let mut live = 0;
    let mut cursor = core.frame().get(0) as usize;
    while cursor != 0 {
        let object = StructRef::from_address(core.heap(), cursor)?;
        live += 1;
        cursor = object.read_pointer_field(core.heap(), NEXT)?;
    }

    let stats = core.stats();
    if config.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("minor collections   {}", stats.minor_collections);
        println!("objects allocated   {}", stats.objects_allocated);
        println!("objects promoted    {}", stats.objects_promoted);
        println!("objects reclaimed   {}", stats.objects_reclaimed);
        println!("nursery in use      {} / {} bytes", stats.nursery_used_bytes, stats.nursery_capacity_bytes);
        println!("old gen in use      {} / {} bytes", stats.old_used_bytes, stats.old_capacity_bytes);
        println!("total pause         {} us", stats.total_pause_us);
        println!("live chain length   {}", live);
    }
    Ok(live)
}

fn main() {
    logging::init();

    let config = match Config::from_args() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
    };

    match run(&config) {
        Ok(live) => info!(live, "Workload finished"),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
