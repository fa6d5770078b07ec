// Command implementations split by subcommand.
pub mod gnss;
pub mod run;

pub use gnss::run_gnss;
pub use run::run_mode;
