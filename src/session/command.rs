//! Device command vocabulary and queue plumbing.
//!
//! [`BmcCommand`] is a closed set: these six variants produce the only
//! strings ever written to the transport, so nothing a client sends over
//! HTTP can smuggle an arbitrary command onto the BMC's shell.

use thiserror::Error;
use tokio::sync::oneshot;

/// Server power state as last reported by the BMC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    On,
    /// Initial value until the first successful query.
    #[default]
    Off,
}

impl PowerState {
    #[must_use]
    pub fn is_on(self) -> bool {
        matches!(self, Self::On)
    }

    #[must_use]
    pub fn from_on(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }
}

/// UID indicator LED state. Independent of [`PowerState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndicatorState {
    On,
    #[default]
    Off,
}

impl IndicatorState {
    #[must_use]
    pub fn is_on(self) -> bool {
        matches!(self, Self::On)
    }

    #[must_use]
    pub fn from_on(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }
}

/// Connection lifecycle state of the BMC session.
///
/// `Ready` is only reached after the startup probes have run and the
/// settle delay has elapsed; any transport failure drops straight back
/// to `Disconnected` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Ready,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
        }
    }
}

/// The closed set of commands the queue will accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BmcCommand {
    QueryPower,
    PowerOn,
    PowerOff,
    QueryIndicator,
    IndicatorOn,
    IndicatorOff,
}

impl BmcCommand {
    /// The exact text written to the BMC's command shell.
    #[must_use]
    pub fn device_command(self) -> &'static str {
        match self {
            Self::QueryPower => "power",
            Self::PowerOn => "power on",
            Self::PowerOff => "power off",
            Self::QueryIndicator => "uid",
            Self::IndicatorOn => "uid on",
            Self::IndicatorOff => "uid off",
        }
    }

    /// Read-only status query (as opposed to a state transition).
    #[must_use]
    pub fn is_query(self) -> bool {
        matches!(self, Self::QueryPower | Self::QueryIndicator)
    }

    /// For transition commands, the state the caller is asking for.
    #[must_use]
    pub fn target_on(self) -> Option<bool> {
        match self {
            Self::PowerOn | Self::IndicatorOn => Some(true),
            Self::PowerOff | Self::IndicatorOff => Some(false),
            Self::QueryPower | Self::QueryIndicator => None,
        }
    }

    /// Whether this command reads or writes the power domain
    /// (`false` means the UID indicator domain).
    #[must_use]
    pub fn is_power_domain(self) -> bool {
        matches!(self, Self::QueryPower | Self::PowerOn | Self::PowerOff)
    }
}

/// Who asked for a command. Poller-originated queries coalesce; user
/// commands get the full pre-check treatment instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOrigin {
    User,
    Poller,
}

/// Successful command resolution, carrying the confirmed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Power(PowerState),
    Indicator(IndicatorState),
}

/// Why a command was rejected or failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Session is not `Ready`; nothing was enqueued.
    #[error("BMC session not connected")]
    NotConnected,
    /// Cached state already matches the requested target; nothing was
    /// enqueued.
    #[error("already in requested state")]
    AlreadyInState,
    /// The same transition is already queued or in flight.
    #[error("identical command already queued")]
    AlreadyQueued,
    /// The BMC itself reported the transition was redundant — the cache
    /// was stale at enqueue time.
    #[error("device reported command redundant")]
    RedundantOnDevice,
    /// Response text matched no known pattern; the effect on device
    /// state is unknown and the cache was left alone.
    #[error("unrecognized device response: {0:?}")]
    UnrecognizedResponse(String),
    /// The transport dropped while this entry was queued or in flight.
    /// Entries are never replayed onto the next session.
    #[error("session lost before command completed")]
    SessionLost,
}

pub type CommandResult = Result<CommandOutcome, CommandError>;

/// A queued command plus the optional reply slot for a waiting caller.
/// Poller entries carry no reply.
#[derive(Debug)]
pub struct QueueEntry {
    pub command: BmcCommand,
    pub reply: Option<oneshot::Sender<CommandResult>>,
}

impl QueueEntry {
    #[must_use]
    pub fn fire_and_forget(command: BmcCommand) -> Self {
        Self {
            command,
            reply: None,
        }
    }

    #[must_use]
    pub fn with_reply(command: BmcCommand) -> (Self, oneshot::Receiver<CommandResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                command,
                reply: Some(tx),
            },
            rx,
        )
    }

    /// Deliver the result to the waiting caller, if any. The receiver
    /// may have been dropped (fire-and-forget HTTP path) — that is fine.
    pub fn resolve(self, result: CommandResult) {
        if let Some(tx) = self.reply {
            let _ = tx.send(result);
        }
    }
}
