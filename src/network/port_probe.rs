//! Local TCP port probing.
//!
//! Availability is checked by binding a loopback listener and dropping it right
//! away. The check is optimistic: a port reported free can be taken by another
//! process before the forwarding tool binds it, in which case the tool's own
//! bind error is classified like any other runtime failure.

use log::{debug, trace, warn};
use std::net::{Ipv4Addr, TcpListener};

use crate::configuration::types::MIN_LOCAL_PORT;
use crate::error_handling::types::ForwardError;

/// Returns `true` when a listener can currently be bound on `127.0.0.1:port`.
pub fn is_available(port: u16) -> bool {
    match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
        Ok(listener) => {
            drop(listener);
            trace!("Port {} is available", port);
            true
        }
        Err(e) => {
            trace!("Port {} is unavailable: {}", port, e);
            false
        }
    }
}

/// Scans `start..=65535` and returns the first available port.
///
/// Fails with [`ForwardError::InvalidRange`] when `start` is below 1024 and with
/// [`ForwardError::NoPortAvailable`] when the scan runs out of ports.
pub fn find_next_available(start: u16) -> Result<u16, ForwardError> {
    if start < MIN_LOCAL_PORT {
        return Err(ForwardError::InvalidRange(start));
    }

    let found = (start..=u16::MAX).find(|port| is_available(*port));
    match found {
        Some(port) => {
            debug!("Next available port from {}: {}", start, port);
            Ok(port)
        }
        None => {
            debug!("No available port in {}-65535", start);
            Err(ForwardError::NoPortAvailable { start })
        }
    }
}

/// Best-effort alternative for an occupied port: the first free port strictly
/// above `port`.
pub fn suggest_alternative(port: u16) -> Option<u16> {
    let start = port.checked_add(1)?;
    find_next_available(start.max(MIN_LOCAL_PORT)).ok()
}

/// Fails with [`ForwardError::PortInUse`] when `port` is taken, carrying the
/// suggested alternative.
///
/// Binding and the suggestion scan are blocking socket calls, so they run on
/// the blocking pool rather than a runtime worker.
pub async fn ensure_available(port: u16) -> Result<(), ForwardError> {
    let checked =
        tokio::task::spawn_blocking(move || (!is_available(port)).then(|| suggest_alternative(port)))
            .await;
    match checked {
        Ok(None) => Ok(()),
        Ok(Some(suggestion)) => Err(ForwardError::PortInUse { port, suggestion }),
        Err(e) => {
            warn!("Availability check for port {} did not complete: {}", port, e);
            Err(ForwardError::PortInUse {
                port,
                suggestion: None,
            })
        }
    }
}
