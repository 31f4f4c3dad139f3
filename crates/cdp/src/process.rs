//! Port helper for the launched browser.

use std::io;

/// Asks the OS for an unused localhost port.
///
/// The listener is dropped before returning, so another process may take
/// the port in between; the launcher reports that as a launch failure.
pub fn pick_free_port() -> io::Result<u16> {
	let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
	Ok(listener.local_addr()?.port())
}
