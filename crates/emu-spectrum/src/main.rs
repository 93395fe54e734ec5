//! Headless ZX Spectrum core runner.
//!
//! Loads a ROM, optionally a tape/disk/snapshot image, runs a fixed
//! number of frames, then prints the final observable state. No video,
//! audio, or windowing — this binary exists to exercise the core from
//! the command line, not to play games on.

use std::path::PathBuf;
use std::process;

use emu_core::Observable;
use emu_spectrum::{Spectrum, SpectrumConfig, SpectrumModel};
use format_csw::CswFile;
use format_sna::SnaSnapshot;
use format_spectrum_tap::TapFile;
use format_tzx::TzxFile;
use wd1793_beta::formats;

struct CliArgs {
    model: String,
    rom_path: Option<PathBuf>,
    tap_path: Option<PathBuf>,
    tzx_path: Option<PathBuf>,
    csw_path: Option<PathBuf>,
    disk_path: Option<PathBuf>,
    sna_path: Option<PathBuf>,
    z80_path: Option<PathBuf>,
    sp_path: Option<PathBuf>,
    frames: u32,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        model: "48k".to_string(),
        rom_path: None,
        tap_path: None,
        tzx_path: None,
        csw_path: None,
        disk_path: None,
        sna_path: None,
        z80_path: None,
        sp_path: None,
        frames: 50,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--model" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.model = s.to_lowercase();
                }
            }
            "--rom" => {
                i += 1;
                cli.rom_path = args.get(i).map(PathBuf::from);
            }
            "--tap" => {
                i += 1;
                cli.tap_path = args.get(i).map(PathBuf::from);
            }
            "--tzx" => {
                i += 1;
                cli.tzx_path = args.get(i).map(PathBuf::from);
            }
            "--csw" => {
                i += 1;
                cli.csw_path = args.get(i).map(PathBuf::from);
            }
            "--disk" => {
                i += 1;
                cli.disk_path = args.get(i).map(PathBuf::from);
            }
            "--sna" => {
                i += 1;
                cli.sna_path = args.get(i).map(PathBuf::from);
            }
            "--z80" => {
                i += 1;
                cli.z80_path = args.get(i).map(PathBuf::from);
            }
            "--sp" => {
                i += 1;
                cli.sp_path = args.get(i).map(PathBuf::from);
            }
            "--frames" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.frames = s.parse().unwrap_or(50);
                }
            }
            _ => {}
        }
        i += 1;
    }

    cli
}

fn model_from_str(s: &str) -> SpectrumModel {
    match s {
        "128k" | "128" => SpectrumModel::Spectrum128K,
        "plus3" | "+3" => SpectrumModel::SpectrumPlus3,
        "pentagon" => SpectrumModel::Pentagon128,
        _ => SpectrumModel::Spectrum48K,
    }
}

/// Guess a disk loader by the image's file extension.
fn load_disk_image(path: &std::path::Path, data: &[u8]) -> Result<wd1793_beta::TrackStore, String> {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase().as_str() {
        "trd" => formats::trd::parse(data),
        "scl" => formats::scl::parse(data),
        "hob" | "$b" | "$c" | "$d" => formats::hob::parse(data),
        "fdi" => formats::fdi::parse(data),
        "td0" => formats::td0::parse(data),
        "udi" => formats::udi::parse(data),
        "isd" => formats::isd::parse(data),
        "pro" => formats::pro::parse(data),
        other => Err(format!("unrecognized disk image extension: {other}")),
    }
}

fn main() {
    let cli = parse_args();

    let Some(rom_path) = &cli.rom_path else {
        eprintln!("usage: emu-spectrum --rom <path> [--model 48k|128k|plus3|pentagon] [--tap/--tzx/--csw <path>] [--disk <path>] [--sna/--z80/--sp <path>] [--frames N]");
        process::exit(1);
    };

    let rom = match std::fs::read(rom_path) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("failed to read ROM {}: {err}", rom_path.display());
            process::exit(1);
        }
    };

    let model = model_from_str(&cli.model);
    let mut spectrum = Spectrum::new(&SpectrumConfig { model, rom, disk_no_delay: true });

    if let Some(path) = &cli.tap_path {
        match std::fs::read(path).map_err(|e| e.to_string()).and_then(|d| TapFile::parse(&d)) {
            Ok(tap) => spectrum.insert_tap(&tap),
            Err(err) => {
                eprintln!("failed to load TAP {}: {err}", path.display());
                process::exit(1);
            }
        }
    } else if let Some(path) = &cli.tzx_path {
        match std::fs::read(path).map_err(|e| e.to_string()).and_then(|d| TzxFile::parse(&d)) {
            Ok(tzx) => {
                if let Err(err) = spectrum.insert_tzx(&tzx) {
                    eprintln!("failed to flatten TZX {}: {err}", path.display());
                    process::exit(1);
                }
            }
            Err(err) => {
                eprintln!("failed to load TZX {}: {err}", path.display());
                process::exit(1);
            }
        }
    } else if let Some(path) = &cli.csw_path {
        match std::fs::read(path).map_err(|e| e.to_string()).and_then(|d| CswFile::parse(&d)) {
            Ok(csw) => spectrum.insert_csw(csw),
            Err(err) => {
                eprintln!("failed to load CSW {}: {err}", path.display());
                process::exit(1);
            }
        }
    }

    if let Some(path) = &cli.disk_path {
        match std::fs::read(path).map_err(|e| e.to_string()).and_then(|d| load_disk_image(path, &d)) {
            Ok(store) => spectrum.insert_disk(0, store),
            Err(err) => {
                eprintln!("failed to load disk image {}: {err}", path.display());
                process::exit(1);
            }
        }
    }

    if let Some(path) = &cli.sna_path {
        match std::fs::read(path).map_err(|e| e.to_string()).and_then(|d| SnaSnapshot::parse(&d)) {
            Ok(snap) => spectrum.load_sna(&snap),
            Err(err) => {
                eprintln!("failed to load SNA {}: {err}", path.display());
                process::exit(1);
            }
        }
    } else if let Some(path) = &cli.z80_path {
        match std::fs::read(path).map_err(|e| e.to_string()).and_then(|d| format_z80::parse(&d)) {
            Ok(snap) => spectrum.load_z80(&snap),
            Err(err) => {
                eprintln!("failed to load Z80 {}: {err}", path.display());
                process::exit(1);
            }
        }
    } else if let Some(path) = &cli.sp_path {
        match std::fs::read(path).map_err(|e| e.to_string()).and_then(|d| format_sp::parse(&d)) {
            Ok(snap) => spectrum.load_sp(&snap),
            Err(err) => {
                eprintln!("failed to load SP {}: {err}", path.display());
                process::exit(1);
            }
        }
    }

    for _ in 0..cli.frames {
        spectrum.run_frame();
    }

    println!("frames run: {}", cli.frames);
    println!("pc:    {}", spectrum.query("cpu.pc").unwrap());
    println!("sp:    {}", spectrum.query("cpu.sp").unwrap());
    println!("af:    {}", spectrum.query("cpu.af").unwrap());
    println!("clock: {}", spectrum.query("clock.now").unwrap());
    println!("tape playing: {}", spectrum.query("tape.playing").unwrap());
}
