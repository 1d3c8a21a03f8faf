//! Parsing and clamping of silence durations

use crate::suspension::{SuspensionError, SuspensionLength};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Words accepted for an open-ended silence
const FOREVER_WORDS: &[&str] = &["forever", "indefinite", "indefinitely", "inf", "permanent"];

/// Duration as typed by the invoking member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationArg {
    Minutes(u32),
    Forever,
}

impl FromStr for DurationArg {
    type Err = SuspensionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim().to_lowercase();
        if FOREVER_WORDS.contains(&input.as_str()) {
            return Ok(Self::Forever);
        }

        let digits = ["minutes", "minute", "mins", "min", "m"]
            .iter()
            .find_map(|suffix| input.strip_suffix(suffix))
            .unwrap_or(&input)
            .trim();

        let minutes: i64 = digits.parse().map_err(|_| {
            SuspensionError::InvalidDuration(format!(
                "`{}` is not a number of minutes or `forever`",
                s.trim()
            ))
        })?;
        if minutes < 0 {
            return Err(SuspensionError::InvalidDuration(
                "duration cannot be negative".to_string(),
            ));
        }

        u32::try_from(minutes)
            .map(Self::Minutes)
            .map_err(|_| SuspensionError::InvalidDuration(format!("{minutes} minutes is too long")))
    }
}

/// Limits applied to silence requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilencePolicy {
    /// Used when no duration (or zero) is given
    pub default_minutes: u32,
    /// Upper bound for members without a moderation role
    pub max_minutes: u32,
}

impl Default for SilencePolicy {
    fn default() -> Self {
        Self {
            default_minutes: 10,
            max_minutes: 15,
        }
    }
}

impl SilencePolicy {
    /// Turn a request into the length actually applied
    ///
    /// Moderators get what they ask for, including forever; everyone else is
    /// capped at `max_minutes`.
    #[must_use]
    pub fn resolve(&self, requested: Option<DurationArg>, privileged: bool) -> SuspensionLength {
        let cap = |minutes: u32| {
            if privileged {
                minutes
            } else {
                minutes.min(self.max_minutes)
            }
        };

        match requested {
            None | Some(DurationArg::Minutes(0)) => SuspensionLength::Minutes(cap(self.default_minutes)),
            Some(DurationArg::Minutes(minutes)) => SuspensionLength::Minutes(cap(minutes)),
            Some(DurationArg::Forever) if privileged => SuspensionLength::Indefinite,
            Some(DurationArg::Forever) => SuspensionLength::Minutes(self.max_minutes),
        }
    }
}
