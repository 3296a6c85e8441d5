//! Reading win counts and timings from simulator output.

use serde::{Deserialize, Serialize};
use sh_types::{validation_error, HpoError, ReportError};
use std::fmt;
use std::str::FromStr;

use crate::simulator::SimulationOutput;

/// How the simulator reports its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportFormat {
    /// `Result: [w0, w1, ...]` (or `Result: w/g`) on stdout and a trailing
    /// `<n>ms` timing on stderr.
    #[default]
    Native,
    /// `wins=<n> elapsed_ms=<n> [games=<n>]` tokens anywhere in the output.
    KeyValue,
}

/// Outcome of one simulator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Games won by the evaluated agent.
    pub wins: u64,
    /// Games actually played, when the simulator says so.
    pub games: Option<u64>,
    pub elapsed_ms: f64,
}

impl ReportFormat {
    pub fn parse(self, output: &SimulationOutput) -> Result<SimulationReport, ReportError> {
        match self {
            ReportFormat::Native => parse_native(output),
            ReportFormat::KeyValue => parse_key_value(output),
        }
    }

    fn label(self) -> &'static str {
        match self {
            ReportFormat::Native => "native",
            ReportFormat::KeyValue => "key-value",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ReportFormat {
    type Err = HpoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(ReportFormat::Native),
            "key-value" | "kv" => Ok(ReportFormat::KeyValue),
            other => Err(validation_error!("unknown report format {other:?}")),
        }
    }
}

fn missing(field: &str, format: ReportFormat) -> ReportError {
    ReportError::MissingField {
        field: field.to_string(),
        format: format.label().to_string(),
    }
}

fn number<T: FromStr>(field: &str, value: &str) -> Result<T, ReportError> {
    value.trim().parse().map_err(|_| ReportError::InvalidNumber {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn parse_native(output: &SimulationOutput) -> Result<SimulationReport, ReportError> {
    let result = output
        .stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix("Result:"))
        .map(str::trim)
        .ok_or_else(|| missing("Result", ReportFormat::Native))?;

    let (wins, games) = if let Some(list) = result.strip_prefix('[') {
        let list = list.trim_end_matches(']');
        let first = list.split(',').next().unwrap_or_default();
        (number("wins", first)?, None)
    } else if let Some((wins, games)) = result.split_once('/') {
        (number("wins", wins)?, Some(number("games", games)?))
    } else {
        (number("wins", result)?, None)
    };

    let elapsed_ms = output
        .stderr
        .split_whitespace()
        .rev()
        .filter_map(|token| token.strip_suffix("ms"))
        .find_map(|value| value.parse::<f64>().ok())
        .ok_or_else(|| missing("elapsed ms", ReportFormat::Native))?;

    Ok(SimulationReport {
        wins,
        games,
        elapsed_ms,
    })
}

fn parse_key_value(output: &SimulationOutput) -> Result<SimulationReport, ReportError> {
    let mut wins = None;
    let mut games = None;
    let mut elapsed = None;
    // Later tokens win.
    for token in output.stdout.split_whitespace().chain(output.stderr.split_whitespace()) {
        match token.split_once('=') {
            Some(("wins", value)) => wins = Some(value),
            Some(("games", value)) => games = Some(value),
            Some(("elapsed_ms", value)) => elapsed = Some(value),
            _ => {}
        }
    }

    let format = ReportFormat::KeyValue;
    Ok(SimulationReport {
        wins: number("wins", wins.ok_or_else(|| missing("wins", format))?)?,
        games: games.map(|g| number("games", g)).transpose()?,
        elapsed_ms: number("elapsed_ms", elapsed.ok_or_else(|| missing("elapsed_ms", format))?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stdout: &str, stderr: &str) -> SimulationOutput {
        SimulationOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            wall_ms: 1,
        }
    }

    #[test]
    fn native_win_list() {
        let out = output(
            "Compiling...\nResult: [612, 388]\n",
            "Finish Game: 998 12ms\nFinish Game: 999 1234ms\n",
        );
        let report = ReportFormat::Native.parse(&out).unwrap();
        assert_eq!(report.wins, 612);
        assert_eq!(report.games, None);
        assert_eq!(report.elapsed_ms, 1234.0);
    }

    #[test]
    fn native_ratio_form() {
        let out = output("Result: 40/100\n", "done in 88ms");
        let report = ReportFormat::Native.parse(&out).unwrap();
        assert_eq!(report.wins, 40);
        assert_eq!(report.games, Some(100));
        assert_eq!(report.elapsed_ms, 88.0);
    }

    #[test]
    fn native_missing_result() {
        let err = ReportFormat::Native.parse(&output("", "5ms")).unwrap_err();
        assert!(matches!(err, ReportError::MissingField { .. }));
    }

    #[test]
    fn native_bad_numbers() {
        let err = ReportFormat::Native
            .parse(&output("Result: [many, 3]", "5ms"))
            .unwrap_err();
        assert_eq!(
            err,
            ReportError::InvalidNumber {
                field: "wins".into(),
                value: "many".into()
            }
        );
        assert!(ReportFormat::Native.parse(&output("Result: [1]", "fastms")).is_err());
        assert!(ReportFormat::Native.parse(&output("Result: [1]", "no timing")).is_err());
    }

    #[test]
    fn key_value_tokens() {
        let out = output("wins=7 games=10", "log line\nelapsed_ms=35.5\n");
        let report = ReportFormat::KeyValue.parse(&out).unwrap();
        assert_eq!(report.wins, 7);
        assert_eq!(report.games, Some(10));
        assert_eq!(report.elapsed_ms, 35.5);
    }

    #[test]
    fn key_value_requires_wins_and_time() {
        assert!(ReportFormat::KeyValue.parse(&output("games=3", "elapsed_ms=1")).is_err());
        assert!(ReportFormat::KeyValue.parse(&output("wins=3", "")).is_err());
    }

    #[test]
    fn format_names() {
        assert_eq!("key-value".parse::<ReportFormat>().unwrap(), ReportFormat::KeyValue);
        assert_eq!(ReportFormat::default().to_string(), "native");
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
