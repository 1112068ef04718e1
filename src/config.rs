use std::{env, str::FromStr, time::Duration};

use tandem_collab::CollabConfig;
use tandem_core::Config;
use tandem_server::DEFAULT_PORT;

use crate::TandemError;

/// Everything tandem reads from the environment on startup
#[derive(Debug, Clone)]
pub struct TandemConfig {
    pub port: u16,
    /// Without one, everything is kept in memory and lost on restart
    pub database_url: Option<String>,
    pub verbose: bool,
    pub hub: Config,
    pub collab: CollabConfig,
}

impl TandemConfig {
    pub fn from_env() -> Result<Self, TandemError> {
        let mut hub = Config::default();
        let mut collab = CollabConfig::default();

        if let Some(secs) = parse_var::<u64>("TANDEM_PING_INTERVAL_SECS")? {
            hub.ping_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(secs) = parse_var::<u64>("TANDEM_REPORT_INTERVAL_SECS")? {
            collab.report_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(max) = parse_var::<u32>("TANDEM_MAX_MEMBERS")? {
            collab.default_max_members = collab.room_capacity(Some(max));
        }

        let verbose = env::var("TANDEM_LOG")
            .map(|level| level.eq_ignore_ascii_case("debug"))
            .unwrap_or(false);

        Ok(Self {
            port: parse_var("TANDEM_SERVER_PORT")?.unwrap_or(DEFAULT_PORT),
            database_url: env::var("TANDEM_DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            verbose,
            hub,
            collab,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, TandemError> {
    let Ok(value) = env::var(name) else {
        return Ok(None);
    };

    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| TandemError::Config { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var() {
        env::set_var("TANDEM_TEST_NUMBER", " 42 ");
        env::set_var("TANDEM_TEST_GARBAGE", "forty-two");

        assert_eq!(parse_var::<u16>("TANDEM_TEST_NUMBER").unwrap(), Some(42));
        assert_eq!(parse_var::<u16>("TANDEM_TEST_MISSING").unwrap(), None);
        assert!(matches!(
            parse_var::<u16>("TANDEM_TEST_GARBAGE"),
            Err(TandemError::Config { name: "TANDEM_TEST_GARBAGE", .. })
        ));
    }
}
