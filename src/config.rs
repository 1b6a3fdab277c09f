use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use clap::Parser;

/// Command line arguments. Each one lands in the config registry under its
/// long name.
#[derive(Debug, Parser)]
#[command(name = "rdbkv", version, about = "Key-value server restored from an RDB snapshot")]
pub struct Args {
    /// Directory holding the snapshot file
    #[arg(long, default_value = ".")]
    pub dir: String,

    /// Snapshot file name
    #[arg(long, default_value = "dump.rdb")]
    pub dbfilename: String,

    /// Port to listen on
    #[arg(long, default_value_t = 6379)]
    pub port: u16,

    /// Master to replicate from, as "<host> <port>"
    #[arg(long)]
    pub replicaof: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub loglevel: String,
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum Parameter {
    Dir,
    DbFilename,
    Port,
    ReplicaOf,
    LogLevel,
}

impl Parameter {
    pub fn name(&self) -> &'static str {
        match self {
            Parameter::Dir => "dir",
            Parameter::DbFilename => "dbfilename",
            Parameter::Port => "port",
            Parameter::ReplicaOf => "replicaof",
            Parameter::LogLevel => "loglevel",
        }
    }
}

/// Runtime configuration, readable from any connection. Names are
/// case-insensitive.
#[derive(Debug, Default)]
pub struct Config {
    values: RwLock<HashMap<String, String>>,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn from_args(args: &Args) -> Self {
        let config = Config::new();
        config.set_parameter(Parameter::Dir, &args.dir);
        config.set_parameter(Parameter::DbFilename, &args.dbfilename);
        config.set_parameter(Parameter::Port, args.port.to_string());
        config.set_parameter(Parameter::LogLevel, &args.loglevel);
        if let Some(master) = &args.replicaof {
            config.set_parameter(Parameter::ReplicaOf, master);
        }
        config
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    pub fn set(&self, name: &str, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn parameter(&self, parameter: Parameter) -> Option<String> {
        self.get(parameter.name())
    }

    pub fn set_parameter(&self, parameter: Parameter, value: impl Into<String>) {
        self.set(parameter.name(), value);
    }
}
