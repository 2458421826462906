//! # Startup parameters passed from host to child.
//!
//! The host appends three `Key==Value` tokens to the child's arguments:
//!
//! ```text
//! ./worker --scene arena ParentProcessPort==47001 ParentProcessPid==3120 ChildPort==47002
//! ```
//!
//! The child reads them back with [`LaunchParams::parse`] (or
//! [`LaunchParams::from_env`]); other arguments are ignored.

use crate::error::LaunchError;

/// Key of the host server port (the child's client target).
pub const PARENT_PROCESS_PORT: &str = "ParentProcessPort";
/// Key of the host process id (watched by the child).
pub const PARENT_PROCESS_PID: &str = "ParentProcessPid";
/// Key of the child's own server port.
pub const CHILD_PORT: &str = "ChildPort";

const SEPARATOR: &str = "==";

/// The three integers a child needs to join the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchParams {
    /// Port of the host's server.
    pub parent_port: u16,
    /// Pid of the host process.
    pub parent_pid: u32,
    /// Port the child's server binds.
    pub child_port: u16,
}

impl LaunchParams {
    /// Renders the parameters as command-line tokens.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            format!("{PARENT_PROCESS_PORT}{SEPARATOR}{}", self.parent_port),
            format!("{PARENT_PROCESS_PID}{SEPARATOR}{}", self.parent_pid),
            format!("{CHILD_PORT}{SEPARATOR}{}", self.child_port),
        ]
    }

    /// Parses a full argument list; the first element (program path) is skipped.
    pub fn parse<I, S>(args: I) -> Result<Self, LaunchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parent_port = None;
        let mut parent_pid = None;
        let mut child_port = None;

        for arg in args.into_iter().skip(1) {
            let Some((key, value)) = arg.as_ref().split_once(SEPARATOR) else {
                continue;
            };
            match key {
                PARENT_PROCESS_PORT => parent_port = Some(number(PARENT_PROCESS_PORT, value)?),
                PARENT_PROCESS_PID => parent_pid = Some(number(PARENT_PROCESS_PID, value)?),
                CHILD_PORT => child_port = Some(number(CHILD_PORT, value)?),
                _ => {}
            }
        }

        Ok(Self {
            parent_port: parent_port.ok_or(LaunchError::Missing(PARENT_PROCESS_PORT))?,
            parent_pid: parent_pid.ok_or(LaunchError::Missing(PARENT_PROCESS_PID))?,
            child_port: child_port.ok_or(LaunchError::Missing(CHILD_PORT))?,
        })
    }

    /// Parses the current process's arguments.
    pub fn from_env() -> Result<Self, LaunchError> {
        Self::parse(std::env::args())
    }
}

fn number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, LaunchError> {
    value.trim().parse().map_err(|_| LaunchError::Invalid {
        key,
        value: value.to_string(),
    })
}
