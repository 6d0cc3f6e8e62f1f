// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build-time generation of the TWIM bus table.
//!
//! The table comes from the `[config.twim]` section of an application TOML.
//! If `TWIM_APP_CONFIG` is set, it holds the contents of `[config]`
//! directly (the way an application build passes configuration down to its
//! crates); otherwise `app/$TWIM_BOARD/app.toml` in this workspace is read,
//! with `TWIM_BOARD` defaulting to `dwm1001`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fmt::Write;
use std::path::Path;

const CONFIG_VAR: &str = "TWIM_APP_CONFIG";
const BOARD_VAR: &str = "TWIM_BOARD";
const DEFAULT_BOARD: &str = "dwm1001";

/// TWIM instance base addresses, by instance number.
const INSTANCES: [u32; 2] = [0x4000_3000, 0x4000_4000];

//
// The `Config` type is shared with whatever else lives in `[config]`; it
// must not set `deny_unknown_fields`.
//
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Config {
    twim: TwimConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct App {
    config: Config,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TwimConfig {
    buses: Vec<TwimBus>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TwimBus {
    /// TWIM instance (0 or 1)
    instance: u8,
    scl: TwimPin,
    sda: TwimPin,
    speed: Speed,
}

#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Hash)]
#[serde(deny_unknown_fields)]
struct TwimPin {
    #[serde(default)]
    port: u8,
    pin: u8,
}

#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq)]
enum Speed {
    #[serde(rename = "100k")]
    K100,
    #[serde(rename = "250k")]
    K250,
    #[serde(rename = "400k")]
    K400,
}

impl Speed {
    fn variant(self) -> &'static str {
        match self {
            Speed::K100 => "K100",
            Speed::K250 => "K250",
            Speed::K400 => "K400",
        }
    }
}

impl TwimConfig {
    pub fn nbuses(&self) -> usize {
        self.buses.len()
    }

    fn validate(&self) -> Result<()> {
        if self.buses.is_empty() {
            bail!("no TWIM buses configured");
        }

        if self.buses.len() > INSTANCES.len() {
            bail!(
                "{} TWIM buses configured; the part has {}",
                self.buses.len(),
                INSTANCES.len()
            );
        }

        let mut instances = HashSet::new();
        let mut pins = HashSet::new();

        for bus in &self.buses {
            let instance = bus.instance;

            if usize::from(instance) >= INSTANCES.len() {
                bail!("TWIM instance {instance} does not exist");
            }

            if !instances.insert(instance) {
                bail!("TWIM instance {instance} appears twice");
            }

            for (name, pin) in [("scl", bus.scl), ("sda", bus.sda)] {
                if pin.port > 1 || pin.pin > 31 {
                    bail!(
                        "TWIM{instance} {name}: P{}.{} is not a GPIO",
                        pin.port,
                        pin.pin
                    );
                }

                if !pins.insert(pin) {
                    bail!(
                        "TWIM{instance} {name}: P{}.{:02} is already in use",
                        pin.port,
                        pin.pin
                    );
                }
            }
        }

        Ok(())
    }
}

/// Parses the contents of `[config]`.
pub fn parse_config(text: &str) -> Result<TwimConfig> {
    let config: Config = toml::from_str(text)?;
    config.twim.validate()?;
    Ok(config.twim)
}

/// Parses a whole application TOML.
pub fn parse_app(text: &str) -> Result<TwimConfig> {
    let app: App = toml::from_str(text)?;
    app.config.twim.validate()?;
    Ok(app.config.twim)
}

///
/// Pulls the bus table for the crate being built.  This will fail if the
/// configuration can't be found, can't parse, or describes an impossible
/// board.
///
pub fn config() -> Result<TwimConfig> {
    // Emitted whether or not the variables are present, so that we'll be
    // re-run if they appear.
    println!("cargo:rerun-if-env-changed={CONFIG_VAR}");
    println!("cargo:rerun-if-env-changed={BOARD_VAR}");

    if let Ok(text) = env::var(CONFIG_VAR) {
        println!("--- toml for ${CONFIG_VAR} ---");
        println!("{text}");
        return parse_config(&text);
    }

    let board = env::var(BOARD_VAR).unwrap_or_else(|_| DEFAULT_BOARD.into());
    let manifest = env::var("CARGO_MANIFEST_DIR")?;
    let path = Path::new(&manifest)
        .join("../../app")
        .join(&board)
        .join("app.toml");

    println!("--- var ${CONFIG_VAR} not present, using {} ---", path.display());
    println!("cargo:rerun-if-changed={}", path.display());

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;

    parse_app(&text).with_context(|| format!("parsing {}", path.display()))
}

pub struct TwimConfigGenerator {
    pub output: String,
    config: TwimConfig,
}

impl TwimConfigGenerator {
    pub fn new(config: TwimConfig) -> Self {
        Self {
            output: String::new(),
            config,
        }
    }

    pub fn generate_header(&mut self) -> Result<()> {
        writeln!(&mut self.output, "pub mod twim_config {{")?;
        Ok(())
    }

    pub fn generate_footer(&mut self) -> Result<()> {
        writeln!(&mut self.output, "}}")?;
        Ok(())
    }

    pub fn generate_buses(&mut self) -> Result<()> {
        let s = &mut self.output;

        writeln!(
            s,
            r##"
    use crate::config::{{BusConfig, Frequency, Pin}};

    #[allow(dead_code)]
    pub const NBUSES: usize = {nbuses};

    pub static BUSES: [BusConfig; NBUSES] = ["##,
            nbuses = self.config.buses.len()
        )?;

        for bus in &self.config.buses {
            writeln!(
                s,
                r##"        BusConfig {{
            base: {base:#x},
            scl: Pin::new({scl_port}, {scl_pin}),
            sda: Pin::new({sda_port}, {sda_pin}),
            frequency: Frequency::{frequency},
        }},"##,
                base = INSTANCES[usize::from(bus.instance)],
                scl_port = bus.scl.port,
                scl_pin = bus.scl.pin,
                sda_port = bus.sda.port,
                sda_pin = bus.sda.pin,
                frequency = bus.speed.variant(),
            )?;
        }

        writeln!(s, "    ];")?;

        Ok(())
    }
}
