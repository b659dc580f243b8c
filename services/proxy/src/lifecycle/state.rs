use std::fmt;

/// Lifecycle of a route's backend as seen by its controller.
///
/// ```text
///   Off --acquire--> StartingUp --ready--> Empty --acquire--> Running
///    ^                   |                  |  ^                 |
///    +----start/poll-----+                  |  +--last release---+
///    +-----------------idle timer-----------+
///    +------------------------dial failure-----------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Backend is stopped (or believed dead).
    Off,
    /// A start command and readiness polling are in flight.
    StartingUp,
    /// Backend is up and serving at least one client.
    Running,
    /// Backend is up with no clients; the idle timer may be armed.
    Empty,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Off => "Off",
            LifecycleState::StartingUp => "StartingUp",
            LifecycleState::Running => "Running",
            LifecycleState::Empty => "Empty",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
