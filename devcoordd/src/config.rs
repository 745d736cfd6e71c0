// Copyright (c) 2026, The devcoord Authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright
//    notice, this list of conditions and the following disclaimer in the
//    documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its
//    contributors may be used to endorse or promote products derived
//    from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use devcoord_api::bind::BindInst;
use devcoord_api::{Error, Result};
use serde_derive::Deserialize;
use std::env;
use tracing::Level;

fn def_log_level() -> String {
    String::from("warn")
}

fn def_devhost_path() -> String {
    String::from("/boot/bin/devhost")
}

#[derive(Deserialize)]
pub struct Config {
    #[serde(default = "def_log_level")]
    log_level: String,
    /// Image every device host is launched from.
    #[serde(default = "def_devhost_path")]
    pub devhost_path: String,
    #[serde(default)]
    pub driver: Vec<DriverEntry>,
}

impl Config {
    pub fn get_log_level(&self) -> Level {
        match self.log_level.as_str() {
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::WARN,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: String::from("warn"),
            devhost_path: def_devhost_path(),
            driver: vec![],
        }
    }
}

/// One `[[driver]]` section: the registry record for a driver the
/// enumerator will register at boot.
#[derive(Deserialize)]
pub struct DriverEntry {
    pub name: String,
    pub libname: String,
    #[serde(default)]
    pub protocol_id: u32,
    #[serde(default)]
    pub binding: Vec<BindInst>,
}

fn from_cmdline(mut cfg: Config) -> (bool, Config) {
    use clap::{crate_version, Arg, ArgAction, Command};

    // Define the command line arguments.

    let matches = Command::new("devcoord")
        .version(crate_version!())
        .about("The system device coordinator.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .action(ArgAction::Set)
                .value_name("FILE")
                .help("Specifies the configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Sets verbosity of log; can be used more than once"),
        )
        .arg(
            Arg::new("print_cfg")
                .long("print-config")
                .action(ArgAction::SetTrue)
                .help("Displays the configuration and exits"),
        )
        .get_matches();

    // The number of '-v' options determines the log level.

    match matches.get_count("verbose") {
        0 => (),
        1 => cfg.log_level = String::from("info"),
        2 => cfg.log_level = String::from("debug"),
        _ => cfg.log_level = String::from("trace"),
    };

    (matches.get_flag("print_cfg"), cfg)
}

fn parse_config(contents: &str) -> Result<Config> {
    toml::from_str(contents)
        .map_err(|e| Error::ConfigError(format!("{}", e)))
        .and_then(|cfg: Config| {
            for entry in &cfg.driver {
                if entry.name.is_empty() || entry.libname.is_empty() {
                    return Err(Error::ConfigError(
                        "driver entries need a name and a libname".into(),
                    ));
                }
            }
            Ok(cfg)
        })
}

async fn from_file(path: &str) -> Option<Result<Config>> {
    use tokio::fs;

    if let Ok(contents) = fs::read(path).await {
        let contents = String::from_utf8_lossy(&contents);

        Some(parse_config(&contents))
    } else {
        None
    }
}

async fn find_cfg() -> Result<Config> {
    const CFG_FILE: &str = "devcoord.toml";

    // Directories that may hold a configuration file, searched in
    // order.

    let mut dirs = vec![String::from("./")];

    // A home-directory config hides behind a leading period.

    if let Ok(home) = env::var("HOME") {
        dirs.push(format!("{}/.", home))
    }

    dirs.push(String::from("/usr/local/etc/"));
    dirs.push(String::from("/usr/pkg/etc/"));
    dirs.push(String::from("/etc/"));

    for dir in dirs {
        let file = format!("{}{}", &dir, CFG_FILE);

        if let Some(cfg) = from_file(&file).await {
            return cfg;
        }
    }
    Ok(Config::default())
}

fn dump_config(cfg: &Config) {
    println!("Configuration:");
    println!("    log level: {}", cfg.get_log_level());
    println!("    devhost: {}\n", cfg.devhost_path);

    println!("Driver configuration:");
    if !cfg.driver.is_empty() {
        for entry in &cfg.driver {
            println!(
                "    name: {}\n    libname: '{}'\n    binding: {} inst\n",
                &entry.name,
                &entry.libname,
                entry.binding.len()
            )
        }
    } else {
        println!("    No drivers specified.");
    }
}

#[tracing::instrument(name = "loading config")]
pub async fn get() -> Option<Config> {
    match find_cfg().await {
        Ok(cfg) => {
            let (print_cfg, cfg) = from_cmdline(cfg);

            if print_cfg {
                dump_config(&cfg);
                None
            } else {
                Some(cfg)
            }
        }
        Err(e) => {
            println!("{}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devcoord_api::bind::{BindOp, Cond, KEY_PROTOCOL};

    #[test]
    fn test_config() {
        // Verify the defaults.

        match toml::from_str::<Config>("") {
            Ok(cfg) => {
                assert_eq!(cfg.get_log_level(), Level::WARN);
                assert_eq!(cfg.devhost_path, "/boot/bin/devhost");
                assert!(cfg.driver.is_empty())
            }
            Err(e) => panic!("TOML parse error: {}", e),
        }

        // Verify the log_level can be set.

        for (text, level) in [
            ("trace", Level::TRACE),
            ("debug", Level::DEBUG),
            ("info", Level::INFO),
            ("warn", Level::WARN),
        ] {
            match toml::from_str::<Config>(&format!(
                "log_level = \"{}\"",
                text
            )) {
                Ok(cfg) => assert_eq!(cfg.get_log_level(), level),
                Err(e) => panic!("TOML parse error: {}", e),
            }
        }

        match toml::from_str::<Config>(
            r#"
devhost_path = "/system/bin/devhost.test"
"#,
        ) {
            Ok(cfg) => {
                assert_eq!(cfg.devhost_path, "/system/bin/devhost.test")
            }
            Err(e) => panic!("TOML parse error: {}", e),
        }
    }

    #[test]
    fn test_driver_section() {
        // Verify that a [[driver]] section needs its entries defined.

        assert!(
            toml::from_str::<Config>("[[driver]]").is_err(),
            "TOML parser accepted empty [[driver]] section"
        );

        assert!(
            toml::from_str::<Config>(
                r#"
[[driver]]
name = "pci"
"#,
            )
            .is_err(),
            "TOML parser accepted [[driver]] section with missing libname"
        );

        match parse_config(
            r#"
[[driver]]
name = "pci"
libname = "driver/bus-pci.so"
"#,
        ) {
            Ok(cfg) => {
                assert_eq!(cfg.driver.len(), 1);
                assert_eq!(cfg.driver[0].name, "pci");
                assert_eq!(cfg.driver[0].libname, "driver/bus-pci.so");
                assert_eq!(cfg.driver[0].protocol_id, 0);
                assert!(cfg.driver[0].binding.is_empty());
            }
            Err(e) => panic!("TOML parse error: {}", e),
        }

        // Empty names are caught by validation even though they parse.

        assert!(parse_config(
            r#"
[[driver]]
name = ""
libname = "driver/x.so"
"#,
        )
        .is_err());
    }

    #[test]
    fn test_binding_program() {
        match parse_config(
            r#"
[[driver]]
name = "gpu"
libname = "driver/gpu.so"
binding = [
    { op = "abort", cond = "not-equal", key = 1, value = 42 },
    { op = "match" },
]
"#,
        ) {
            Ok(cfg) => {
                let program = &cfg.driver[0].binding;

                assert_eq!(program.len(), 2);
                assert_eq!(program[0].op, BindOp::Abort);
                assert_eq!(program[0].cond, Cond::NotEqual);
                assert_eq!(program[0].key, KEY_PROTOCOL);
                assert_eq!(program[0].value, 42);
                assert_eq!(program[1].op, BindOp::Match);
                assert_eq!(program[1].cond, Cond::Always);
            }
            Err(e) => panic!("TOML parse error: {}", e),
        }

        assert!(
            parse_config(
                r#"
[[driver]]
name = "gpu"
libname = "driver/gpu.so"
binding = [{ op = "frobnicate" }]
"#,
            )
            .is_err(),
            "TOML parser accepted unknown binding op"
        );
    }
}
