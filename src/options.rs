use clap::Parser;

/// neovolt-bridge - polling and dispatch for Modbus TCP battery inverters
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,

    /// Read the battery SOC of every enabled device once and exit
    #[clap(long = "probe")]
    pub probe: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}

