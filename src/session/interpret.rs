//! Mapping from raw BMC response text to typed results.
//!
//! Everything here is a pure function of `(command, response)` — no state,
//! no I/O — so the full phrase table is unit-testable without a device.
//!
//! The BMC answers `uid on` and `uid off` with the same `COMMAND COMPLETE`
//! line, so indicator confirmations are attributed from the request
//! direction. A complete-but-failed transition would be misread here;
//! the firmware has not been observed to produce one.

use super::command::BmcCommand;

/// What a response text told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpretation {
    /// Response unambiguously states the resulting state (`true` = on).
    Confirmed(bool),
    /// Device says the requested transition was already in effect.
    Redundant,
    /// No known pattern matched; the command's effect is unknown.
    Unrecognized,
}

/// Interpret `response` as the answer to `command`.
#[must_use]
pub fn interpret(command: BmcCommand, response: &str) -> Interpretation {
    match command {
        BmcCommand::QueryPower | BmcCommand::QueryIndicator => interpret_query(response),
        BmcCommand::PowerOn => interpret_transition(
            response,
            "server power already on",
            "server powering on",
            true,
        ),
        BmcCommand::PowerOff => interpret_transition(
            response,
            "server power already off",
            "server powering off",
            false,
        ),
        BmcCommand::IndicatorOn => {
            interpret_transition(response, "unit id already on", "command complete", true)
        }
        BmcCommand::IndicatorOff => {
            interpret_transition(response, "unit id already off", "command complete", false)
        }
    }
}

/// Status queries answer with a `label : state` line; the state word is
/// whatever follows the last colon (e.g. `Server Power: On`).
fn interpret_query(response: &str) -> Interpretation {
    let token = response
        .rsplit(':')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match token.as_str() {
        "on" => Interpretation::Confirmed(true),
        "off" => Interpretation::Confirmed(false),
        _ => Interpretation::Unrecognized,
    }
}

/// Transition commands answer with either an "already ..." notice or a
/// confirmation phrase. Matching is a case-insensitive substring search;
/// the firmware pads responses with prompts and blank lines.
fn interpret_transition(
    response: &str,
    redundant_phrase: &str,
    confirm_phrase: &str,
    resulting_on: bool,
) -> Interpretation {
    let lowered = response.to_lowercase();
    if lowered.contains(redundant_phrase) {
        Interpretation::Redundant
    } else if lowered.contains(confirm_phrase) {
        Interpretation::Confirmed(resulting_on)
    } else {
        Interpretation::Unrecognized
    }
}
