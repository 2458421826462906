//! Ephemeral loopback port probing.
//!
//! The port is released before it is returned, so another process may take it
//! before the caller binds. Acceptable for a local, low-concurrency setup.

use std::io;
use std::net::{Ipv4Addr, TcpListener};

/// Asks the OS for a currently free port on `127.0.0.1`.
pub fn free_port() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}
