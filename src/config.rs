use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use clap::{ArgAction, Parser};

#[derive(Debug, Parser)]
#[command(name = "graceful", about = "Echo server that drains its connections on shutdown")]
pub struct Args {
    /// Port to listen on
    #[arg(default_value_t = 8080)]
    pub port: u16,

    /// Address to bind
    #[arg(long, value_name = "ADDR", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// How long to wait for connections to finish after a signal ("none" waits forever)
    #[arg(long, value_name = "DURATION", default_value = "10s")]
    pub grace: GracePeriod,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Shutdown grace period. `None` means no limit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GracePeriod(pub Option<Duration>);

impl FromStr for GracePeriod {
    type Err = humantime::DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("none") {
            return Ok(GracePeriod(None));
        }
        humantime::parse_duration(s).map(|d| GracePeriod(Some(d)))
    }
}
