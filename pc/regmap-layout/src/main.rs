use std::fmt::Write as _;
use std::fs::{read_to_string, write};
use std::io::{stdout, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use register_map::{MemoryConfiguration, RegisterMap, RegisterMapDocument};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "regmap-layout", version, about)]
struct Args {
    /// Log every size and address change.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(flatten)]
    memory: MemoryOverrides,

    #[command(subcommand)]
    command: Command,
}

// Each flag replaces the value from the document's memory section.
#[derive(clap::Args)]
struct MemoryOverrides {
    #[arg(long, global = true)]
    memory_unit_bits: Option<u32>,

    #[arg(long, global = true)]
    address_bits: Option<u32>,

    #[arg(long, global = true, value_parser = parse_address)]
    base_address: Option<u64>,

    #[arg(long, global = true, value_parser = parse_address)]
    page_size: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Prints the settled layout of every module, register and field.
    Show { document: PathBuf },

    /// Writes the settled document, including computed addresses and sizes.
    Resolve {
        document: PathBuf,

        /// Defaults to stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Only checks that the document settles.
    Check { document: PathBuf },
}

fn parse_address(text: &str) -> Result<u64, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|error| format!("invalid address {text:?}: {error}"))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &args.command {
        Command::Show { document } => {
            let map = load(document, &args.memory)?;
            let report = render_report(&map)?;
            stdout().lock().write_all(report.as_bytes())?;
        }
        Command::Resolve { document, output } => {
            let map = load(document, &args.memory)?;
            let mut text = map.to_json()?;
            text.push('\n');
            match output {
                Some(path) => {
                    write(path, text).with_context(|| format!("Writing {:?}", path))?;
                    info!(path = ?path, "settled document written");
                }
                None => stdout().lock().write_all(text.as_bytes())?,
            }
        }
        Command::Check { document } => {
            let map = load(document, &args.memory)?;
            let registers: usize = map
                .modules()
                .map(|module| module.registers().len())
                .sum();
            println!(
                "{}: {} module(s), {registers} register(s), {} field(s)",
                document.display(),
                map.modules().count(),
                map.fields().count(),
            );
        }
    }
    Ok(())
}

fn load(path: &Path, overrides: &MemoryOverrides) -> Result<RegisterMap> {
    let text = read_to_string(path).with_context(|| format!("Reading {:?}", path))?;
    let mut document: RegisterMapDocument =
        serde_json::from_str(&text).with_context(|| format!("Parsing {:?}", path))?;
    apply_overrides(&mut document.memory, overrides)?;
    debug!(path = ?path, modules = document.modules.len(), "document loaded");
    RegisterMap::from_document(&document).with_context(|| format!("Laying out {:?}", path))
}

fn apply_overrides(memory: &mut MemoryConfiguration, overrides: &MemoryOverrides) -> Result<()> {
    if let Some(bits) = overrides.memory_unit_bits {
        memory.set_memory_unit_bits(bits)?;
    }
    if let Some(bits) = overrides.address_bits {
        memory.set_address_bits(bits)?;
    }
    if let Some(address) = overrides.base_address {
        memory.set_base_address(address)?;
    }
    if overrides.page_size.is_some() {
        memory.set_page_size(overrides.page_size)?;
    }
    Ok(())
}

fn render_report(map: &RegisterMap) -> Result<String> {
    let memory = map.memory();
    let digits = usize::try_from((memory.address_bits() + 3) / 4)?;
    let mut report = String::new();

    write!(
        report,
        "memory: {}-bit units, {}-bit addresses, base {:#x}",
        memory.memory_unit_bits(),
        memory.address_bits(),
        memory.base_address(),
    )?;
    match memory.page_size() {
        Some(page_size) => writeln!(
            report,
            ", {page_size:#x}-unit pages ({} page register unit(s))",
            memory.page_register_units()
        )?,
        None => writeln!(report)?,
    }

    for module in map.modules() {
        writeln!(report)?;
        write!(report, "{}", module.name())?;
        if let Some(start) = module.start_address() {
            write!(report, " @ {start:#0width$x}", width = digits + 2)?;
        }
        write!(report, ", span {}", module.span_memory_units())?;
        if module.instances() > 1 {
            let addresses: Vec<String> = module
                .instance_addresses()
                .iter()
                .map(|address| format!("{address:#x}"))
                .collect();
            write!(report, ", {} instances at {}", module.instances(), addresses.join(" "))?;
        }
        writeln!(report)?;

        for register in map.registers(module.id()) {
            let address = match register.start_address() {
                Some(start) => format!("{start:#0width$x}", width = digits + 2),
                None => "unresolved".to_owned(),
            };
            writeln!(
                report,
                "  {address} {:<20} {:>3} unit(s) {}",
                register.name(),
                register.size_memory_units(),
                register.mode(),
            )?;
            for mapping in register.bitmap().mappings() {
                let Some(field) = map.field(mapping.field) else {
                    continue;
                };
                let scope = if field.is_global() { " (global)" } else { "" };
                writeln!(
                    report,
                    "      {:<10} {}{scope} {} reset {:#x}",
                    mapping.source.to_string(),
                    field.name(),
                    mapping.destination,
                    field.reset_value(),
                )?;
            }
        }
    }
    Ok(report)
}
