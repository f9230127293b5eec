use std::env::args;
use std::str::FromStr;
use std::string::ToString;

use lock_audit::AuditorConfig;
use strum::IntoEnumIterator;
use strum_macros::{self, Display, EnumIter, EnumString};

mod logging;
mod scenarios;

fn main() -> Result<(), String> {
    logging::init()?;
    let config = AuditorConfig::from_env();
    if !config.enabled {
        return Err("scenarios need the auditor, LOCK_AUDIT turns it off".to_string());
    }
    args()
        .nth(1)
        .ok_or(format!(
            "no scenario supplied, use one of {} or see unit tests",
            Scenario::iter()
                .map(|c| c.to_string())
                .collect::<Vec<String>>()
                .join(",")
        ))
        .and_then(|selector| Scenario::from_str(&selector).map_err(|e| e.to_string()))
        .and_then(|scenario| match scenario {
            Scenario::All => Scenario::iter()
                .filter(|s| !matches!(s, Scenario::All))
                .try_for_each(|s| s.run(config)),
            single => single.run(config),
        })
}

#[derive(Clone, Copy, EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
enum Scenario {
    Relock,
    TryLock,
    Recursive,
    RecursiveMixed,
    ReadWrite,
    ReentrantReadWrite,
    Stress,
    Inversion,
    All,
}

impl Scenario {
    fn run(self, config: AuditorConfig) -> Result<(), String> {
        log::info!("--- {self}");
        let outcome = match self {
            Scenario::Relock => scenarios::relock(config),
            Scenario::TryLock => scenarios::try_lock(config),
            Scenario::Recursive => scenarios::recursive(config),
            Scenario::RecursiveMixed => scenarios::recursive_mixed(config),
            Scenario::ReadWrite => scenarios::read_write(config),
            Scenario::ReentrantReadWrite => scenarios::reentrant_read_write(config),
            Scenario::Stress => scenarios::stress(config),
            Scenario::Inversion => scenarios::inversion(config),
            Scenario::All => Ok(()),
        };
        match &outcome {
            Ok(()) => log::info!("{self} passed"),
            Err(e) => log::error!("{self} failed: {e}"),
        }
        outcome.map_err(|e| format!("{self}: {e}"))
    }
}
