use std::fmt::{Display, Formatter};

use clap::{Parser, ValueEnum};

use crate::keys::KeyDistributorType;

#[derive(Parser, Debug, Clone)]
#[command(version = "0.1.0", about = "msgbench standalone worker (loopback driver)")]
pub struct Args {
    /// Aggregate publish rate across all producers, in messages per second
    #[clap(
        short = 'r',
        long,
        value_name = "MSGS_PER_SEC",
        env = "MSGBENCH_RATE",
        default_value_t = 10_000.0
    )]
    pub rate: f64,

    /// Benchmark duration in seconds
    #[clap(
        short = 'd',
        long,
        value_name = "SECONDS",
        env = "MSGBENCH_DURATION",
        default_value_t = 10
    )]
    pub duration: u64,

    /// Number of topics; each gets one producer and one consumer
    #[clap(
        short = 't',
        long,
        value_name = "N",
        env = "MSGBENCH_TOPICS",
        default_value_t = 1
    )]
    pub topics: u32,

    /// Partitions per created topic
    #[clap(long, value_name = "N", env = "MSGBENCH_PARTITIONS", default_value_t = 1)]
    pub partitions: u32,

    /// Payload size in bytes
    #[clap(
        short = 's',
        long,
        value_name = "BYTES",
        env = "MSGBENCH_PAYLOAD_SIZE",
        default_value_t = 1024
    )]
    pub payload_size: usize,

    /// Per-message key distribution
    #[clap(
        value_enum,
        short = 'k',
        long,
        value_name = "KIND",
        env = "MSGBENCH_KEY_DISTRIBUTOR",
        default_value_t = KeyDistributorArg::NoKey
    )]
    pub key_distributor: KeyDistributorArg,

    /// How often (in seconds) to log period statistics
    #[clap(
        long,
        value_name = "SECONDS",
        env = "MSGBENCH_STATS_INTERVAL",
        default_value_t = 1
    )]
    pub stats_interval: u64,

    /// Keep quiet and only log errors
    #[clap(short, long, conflicts_with = "verbose", default_value_t = false)]
    pub quiet: bool,

    #[clap(
        short = 'v',
        long,
        conflicts_with = "quiet",
        action = clap::ArgAction::Count,
        help = "Output details about the run; specify multiple times for more detail"
    )]
    pub verbose: u8,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDistributorArg {
    #[value(name = "no-key")]
    NoKey,
    #[value(name = "round-robin")]
    RoundRobin,
    #[value(name = "random-nano")]
    RandomNano,
}

impl Display for KeyDistributorArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value = self.to_possible_value().unwrap();
        f.write_str(value.get_name())
    }
}

impl From<KeyDistributorArg> for KeyDistributorType {
    fn from(arg: KeyDistributorArg) -> Self {
        match arg {
            KeyDistributorArg::NoKey => KeyDistributorType::NoKey,
            KeyDistributorArg::RoundRobin => KeyDistributorType::KeyRoundRobin,
            KeyDistributorArg::RandomNano => KeyDistributorType::RandomNano,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let args = Args::parse_from(["msgbench_worker"]);
        assert_eq!(args.duration, 10);
        assert_eq!(args.topics, 1);
        assert_eq!(args.key_distributor, KeyDistributorArg::NoKey);
    }

    #[test]
    fn key_distributor_arg_maps_to_type() {
        let args = Args::parse_from(["msgbench_worker", "-k", "round-robin"]);
        assert_eq!(
            KeyDistributorType::from(args.key_distributor),
            KeyDistributorType::KeyRoundRobin
        );
    }
}
