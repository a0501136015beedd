//! Configuration for the linksim application.
//!
//! Handles parsing command-line arguments and generating sensible defaults
//! (including randomized defaults that are reproducible with a seed).
//!
//! # Philosophy
//!
//! The tool should work with ZERO arguments, using intelligent defaults.
//! All defaults are printed so runs are reproducible. Link settings start
//! from a YAML file when `--config` is given; flags override the file.

use linksim_core::config::{Direction, FcsMode, LinkConfig, TransferRate};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::path::PathBuf;

/// Which lab scenario to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Point to point, no medium access control
    Bus,
    /// Contended bus with collision handling
    Csma,
    /// Three-station token ring
    Ring,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Bus => write!(f, "bus"),
            Mode::Csma => write!(f, "csma"),
            Mode::Ring => write!(f, "ring"),
        }
    }
}

/// Complete configuration for a run.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,

    /// Seed for generated traffic and every fault model
    pub seed: u64,

    /// Link settings shared with the core
    pub link: LinkConfig,

    /// YAML file the link settings came from
    pub config_file: Option<PathBuf>,

    // === Traffic ===
    /// Fixed message to send (None = generate samples)
    pub message: Option<String>,

    /// Number of generated messages
    pub count: usize,

    /// Scheduler ticks to run in ring mode
    pub ring_ticks: u32,

    // === Behavior ===
    /// Whether to print detailed config
    pub print_config: bool,

    /// Whether to print detailed metrics summary
    pub print_metrics: bool,
}

fn value<'a>(args: &'a [String], i: usize, flag: &str, what: &str) -> Result<&'a str, String> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires {what}"))
}

impl Config {
    /// Parse configuration from command-line arguments.
    ///
    /// If --seed is not provided a time-based seed is used.
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        let mut mode = Mode::Bus;
        let mut seed: Option<u64> = None;
        let mut config_file: Option<PathBuf> = None;
        let mut message: Option<String> = None;
        let mut count: Option<usize> = None;
        let mut ring_ticks: Option<u32> = None;
        let mut rate: Option<TransferRate> = None;
        let mut direction: Option<Direction> = None;
        let mut block_size: Option<u8> = None;
        let mut corruption: Option<f64> = None;
        let mut dwell_ms: Option<u64> = None;
        let mut no_fcs = false;
        let mut print_config = false;
        let mut print_metrics = true;

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--mode" => {
                    i += 1;
                    mode = match value(args, i, flag, "bus, csma or ring")? {
                        "bus" => Mode::Bus,
                        "csma" => Mode::Csma,
                        "ring" => Mode::Ring,
                        other => return Err(format!("unknown mode: {other}")),
                    };
                }
                "--seed" => {
                    i += 1;
                    seed = Some(value(args, i, flag, "a number")?.parse().map_err(|_| "invalid seed")?);
                }
                "--config" => {
                    i += 1;
                    config_file = Some(PathBuf::from(value(args, i, flag, "a path")?));
                }
                "--message" => {
                    i += 1;
                    message = Some(value(args, i, flag, "text")?.to_string());
                }
                "--count" => {
                    i += 1;
                    count = Some(value(args, i, flag, "a number")?.parse().map_err(|_| "invalid count")?);
                }
                "--ticks" => {
                    i += 1;
                    ring_ticks = Some(value(args, i, flag, "a number")?.parse().map_err(|_| "invalid ticks")?);
                }
                "--rate" => {
                    i += 1;
                    let baud: u32 = value(args, i, flag, "a baud rate")?
                        .parse()
                        .map_err(|_| "invalid rate")?;
                    rate = Some(TransferRate::try_from(baud).map_err(|e| e.to_string())?);
                }
                "--direction" => {
                    i += 1;
                    direction = match value(args, i, flag, "1-2 or 6-5")? {
                        "1-2" => Some(Direction::OneToTwo),
                        "6-5" => Some(Direction::SixToFive),
                        other => return Err(format!("unknown direction: {other}")),
                    };
                }
                "--block-size" => {
                    i += 1;
                    block_size = Some(value(args, i, flag, "a number")?.parse().map_err(|_| "invalid block size")?);
                }
                "--corrupt" => {
                    i += 1;
                    corruption = Some(value(args, i, flag, "a probability")?.parse().map_err(|_| "invalid probability")?);
                }
                "--dwell-ms" => {
                    i += 1;
                    dwell_ms = Some(value(args, i, flag, "a number")?.parse().map_err(|_| "invalid dwell")?);
                }
                "--no-fcs" => {
                    no_fcs = true;
                }
                "--print-config" => {
                    print_config = true;
                }
                "--no-metrics" => {
                    print_metrics = false;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                _ => {
                    return Err(format!("unknown argument: {flag}"));
                }
            }
            i += 1;
        }

        // Determine seed (explicit or time-based)
        let seed = seed.unwrap_or_else(|| {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_millis() as u64)
        });

        let mut link = match &config_file {
            Some(path) => {
                let yaml = std::fs::read_to_string(path)
                    .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
                LinkConfig::from_yaml_str(&yaml).map_err(|e| e.to_string())?
            }
            None => LinkConfig::default(),
        };

        // Generate defaults using seed
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        link.csma.seed = seed;
        if let Some(rate) = rate {
            link.transfer_rate = rate;
        } else if config_file.is_none() {
            link.transfer_rate = TransferRate::ALL[rng.gen_range(0..TransferRate::ALL.len())];
        }
        if let Some(direction) = direction {
            link.direction = direction;
        }
        if let Some(n) = block_size {
            link.block_size = n;
        }
        if no_fcs {
            link.fcs = FcsMode::ZeroPlaceholder;
        }
        if let Some(p) = corruption {
            link.csma.corruption_probability = p;
        } else if config_file.is_none() && mode == Mode::Bus {
            // Bus runs exercise single-bit correction by default
            link.csma.corruption_probability = 0.7;
        }
        if let Some(ms) = dwell_ms {
            link.ring.dwell_ms = ms;
        }
        link.validate().map_err(|e| e.to_string())?;

        Ok(Config {
            mode,
            seed,
            link,
            config_file,
            message,
            count: count.unwrap_or_else(|| rng.gen_range(3..=8)),
            ring_ticks: ring_ticks.unwrap_or(12),
            print_config,
            print_metrics,
        })
    }

    /// Print the configuration in human-readable form.
    pub fn print(&self) {
        let link = &self.link;
        let codec = link.codec();

        println!("=== Configuration ===");
        println!("Mode: {}", self.mode);
        println!("Seed: {}", self.seed);
        if let Some(path) = &self.config_file {
            println!("Config file: {}", path.display());
        }
        println!();
        println!("=== Link ===");
        println!("Direction: {} ({} -> {})", link.direction, link.direction.source_port(), link.direction.destination_port());
        println!("Rate: {} baud", link.transfer_rate.baud());
        println!("Flag: {}", String::from_utf8_lossy(&codec.flag));
        println!("Data length: {} bytes", codec.data_length);
        println!("FCS: {:?}", link.fcs);
        println!("Receive poll: {} ms", link.receive_poll_ms);
        println!();
        match self.mode {
            Mode::Bus => {
                println!("Receive corruption: {:.0}%", link.csma.corruption_probability * 100.0);
            }
            Mode::Csma => {
                println!("Busy probability: {:.0}%", link.csma.busy_probability * 100.0);
                println!("Collision probability: {:.0}%", link.csma.collision_probability * 100.0);
                println!("Busy poll: {} ms", link.csma.busy_poll_ms);
                println!("Max attempts: {}", link.csma.max_attempts);
            }
            Mode::Ring => {
                println!("Dwell: {} ms", link.ring.dwell_ms);
                println!("Token timeout: {} ms", link.ring.token_timeout_ms);
                println!("Ticks: {}", self.ring_ticks);
            }
        }
        println!();
    }
}

fn print_help() {
    println!("linksim: Educational data-link protocol simulator");
    println!();
    println!("USAGE:");
    println!("    linksim [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --mode <bus|csma|ring>  Scenario to run (default: bus)");
    println!("    --seed <N>              Random seed for determinism");
    println!("    --config <PATH>         YAML link configuration");
    println!();
    println!("    --message <TEXT>        Send this text (default: generated samples)");
    println!("    --count <N>             Generated messages (default: random 3-8)");
    println!("    --ticks <N>             Ring scheduler ticks (default: 12)");
    println!();
    println!("    --rate <BAUD>           9600, 19200, 38400, 57600 or 115200 (default: random)");
    println!("    --direction <1-2|6-5>   COM1 -> COM2 or COM6 -> COM5 (default: 1-2)");
    println!("    --block-size <N>        Block parameter n, payload n+1 bytes (default: 5)");
    println!("    --no-fcs                Four zero bytes instead of a CRC-8");
    println!("    --corrupt <P>           Receive-side bit flip probability (bus default: 0.7)");
    println!("    --dwell-ms <MS>         Token dwell per station (default: 3000)");
    println!();
    println!("    --print-config          Print resolved configuration");
    println!("    --no-metrics            Don't print metrics summary");
    println!("    --help, -h              Print this help");
    println!();
    println!("EXAMPLES:");
    println!("    linksim --seed 42                              # Deterministic bus run");
    println!("    linksim --mode csma --message hello            # One contended frame");
    println!("    linksim --mode ring --dwell-ms 200 --ticks 30  # Fast ring");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_are_seeded() {
        let a = Config::from_args(&args(&["--seed", "5"])).unwrap();
        let b = Config::from_args(&args(&["--seed", "5"])).unwrap();

        assert_eq!(a.mode, Mode::Bus);
        assert_eq!(a.count, b.count);
        assert_eq!(a.link.transfer_rate, b.link.transfer_rate);
        assert_eq!(a.link.csma.corruption_probability, 0.7);
        assert_eq!(a.link.csma.seed, 5);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_args(&args(&[
            "--mode", "csma", "--rate", "38400", "--direction", "6-5", "--block-size", "3", "--no-fcs",
        ]))
        .unwrap();

        assert_eq!(config.mode, Mode::Csma);
        assert_eq!(config.link.transfer_rate.baud(), 38400);
        assert_eq!(config.link.direction, Direction::SixToFive);
        assert_eq!(config.link.codec().data_length, 4);
        assert_eq!(config.link.fcs, FcsMode::ZeroPlaceholder);
        assert_eq!(config.link.csma.corruption_probability, 0.0);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(Config::from_args(&args(&["--mode", "mesh"])).is_err());
        assert!(Config::from_args(&args(&["--rate", "300"])).is_err());
        assert!(Config::from_args(&args(&["--seed"])).is_err());
        assert!(Config::from_args(&args(&["--block-size", "40"])).is_err());
        assert!(Config::from_args(&args(&["--bogus"])).is_err());
    }
}
