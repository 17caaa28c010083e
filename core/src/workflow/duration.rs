// switchyard/src/workflow/duration.rs

//! Go-style duration strings as used by `wait:` (`500ms`, `1s`, `1h30m`, `1.5h`).

use crate::error::{WorkflowError, WorkflowResult};
use std::time::Duration;

fn unit_nanos(unit: &str) -> Option<f64> {
  Some(match unit {
    "ns" => 1.0,
    "us" | "µs" => 1e3,
    "ms" => 1e6,
    "s" => 1e9,
    "m" => 60.0 * 1e9,
    "h" => 3600.0 * 1e9,
    _ => return None,
  })
}

pub fn parse_duration(input: &str) -> WorkflowResult<Duration> {
  let invalid = || WorkflowError::InvalidDuration {
    value: input.to_string(),
  };
  let s = input.trim();
  if s == "0" {
    return Ok(Duration::ZERO);
  }
  if s.is_empty() {
    return Err(invalid());
  }

  let mut total_nanos = 0f64;
  let mut rest = s;
  while !rest.is_empty() {
    let number_len = rest
      .char_indices()
      .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
      .map(|(i, _)| i)
      .unwrap_or(rest.len());
    if number_len == 0 {
      return Err(invalid());
    }
    let number: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
    rest = &rest[number_len..];

    let unit_len = rest
      .char_indices()
      .find(|(_, c)| c.is_ascii_digit() || *c == '.')
      .map(|(i, _)| i)
      .unwrap_or(rest.len());
    let factor = unit_nanos(&rest[..unit_len]).ok_or_else(invalid)?;
    rest = &rest[unit_len..];

    total_nanos += number * factor;
  }

  Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_single_units() {
    assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
    assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
  }

  #[test]
  fn parses_compound_and_fractional() {
    assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
    assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
  }

  #[test]
  fn rejects_garbage() {
    assert!(parse_duration("soon").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("5 days").is_err());
    assert!(parse_duration("").is_err());
  }
}
