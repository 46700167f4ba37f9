use structopt::StructOpt;

use super::log::Level;

#[derive(StructOpt, Debug, Clone, Default)]
#[structopt(name = "ssmpd", about = "SSMP publish/subscribe broker")]
pub struct Options {
    /// Config filename
    #[structopt(name = "config", short = "f", long)]
    pub cfg_name: Option<String>,

    /// Log level, overrides `log.level` of the config file
    #[structopt(name = "log-level", long)]
    pub log_level: Option<Level>,
}
