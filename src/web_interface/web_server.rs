use log::info;
use std::net::{Ipv4Addr, SocketAddr};

use super::routes::api_routes;
use crate::error_handling::types::WebError;
use crate::network::port_probe;
use crate::session_management::ForwardManager;

/// Web server for the status API
pub struct WebServer {
    manager: ForwardManager,
}

impl WebServer {
    pub fn new(manager: ForwardManager) -> Self {
        Self { manager }
    }

    /// Serves the API on `127.0.0.1:port` until the task is dropped.
    pub async fn start(&self, port: u16) -> Result<(), WebError> {
        if !port_probe::is_available(port) {
            return Err(WebError::BindFailed(format!(
                "127.0.0.1:{} is already in use",
                port
            )));
        }

        let routes = api_routes(self.manager.clone());
        let addr: SocketAddr = (Ipv4Addr::LOCALHOST, port).into();
        info!("Status API listening on http://{}", addr);
        warp::serve(routes).run(addr).await;

        Ok(())
    }
}
