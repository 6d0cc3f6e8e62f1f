// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::Result;
use std::env;
use std::fs::File;
use std::path::Path;

use build_twim::TwimConfigGenerator;

fn codegen() -> Result<()> {
    use std::io::Write;

    let out_dir = env::var("OUT_DIR")?;
    let dest_path = Path::new(&out_dir).join("twim_config.rs");
    let mut file = File::create(dest_path)?;

    let mut g = TwimConfigGenerator::new(build_twim::config()?);

    g.generate_header()?;
    g.generate_buses()?;
    g.generate_footer()?;

    file.write_all(g.output.as_bytes())?;

    Ok(())
}

fn main() {
    if let Err(e) = codegen() {
        println!("code generation failed: {e:#}");
        std::process::exit(1);
    }

    println!("cargo:rerun-if-changed=build.rs");
}
