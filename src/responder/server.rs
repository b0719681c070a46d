//! Responder accept loop.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{error, info};

use super::{Responder, ResponderSettings, SessionEnd};
use crate::config::{AppConfig, CameraBackend};
use crate::error::Result;
use crate::hardware::{Camera, RaspiCamera, SimulatedBoard, SimulatedCamera};
use crate::link::{Endpoint, Link};
use crate::transfer::{DisabledTransfer, FileTransfer, NetcatTransfer};

/// Serves sessions forever, rebuilding the connection after each one.
pub struct ResponderServer {
    link: Link,
    responder: Responder,
    retry_delay: Duration,
    sessions: u64,
}

impl ResponderServer {
    pub fn new(link: Link, responder: Responder, retry_delay: Duration) -> Self {
        Self {
            link,
            responder,
            retry_delay,
            sessions: 0,
        }
    }

    /// Build the server and its peripherals from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let camera: Box<dyn Camera> = match config.responder.camera {
            CameraBackend::Simulated => Box::new(SimulatedCamera::new()),
            CameraBackend::Raspicam => Box::new(RaspiCamera::new()),
        };
        let transfer: Box<dyn FileTransfer> = if config.transfer.enabled {
            Box::new(NetcatTransfer::new(
                config.transfer.program.clone(),
                config.network.transfer_port,
                Duration::ZERO,
            ))
        } else {
            Box::new(DisabledTransfer)
        };

        let responder = Responder::new(
            camera,
            Box::new(SimulatedBoard::new()),
            transfer,
            ResponderSettings::from_config(config),
        );
        let link = Link::new(config.responder_endpoint()).with_connect_timeout(config.network.connect_timeout());

        Self::new(link, responder, config.network.retry_delay())
    }

    /// Bind now when listening, so port errors surface before the loop.
    pub fn bind(&mut self) -> Result<Option<SocketAddr>> {
        if matches!(self.link.endpoint(), Endpoint::Listen(_)) {
            Ok(Some(self.link.bind()?))
        } else {
            Ok(None)
        }
    }

    /// Establish one connection and serve it to the end.
    ///
    /// A failed session resets the peripherals before the error is returned.
    pub fn serve_one(&mut self) -> Result<SessionEnd> {
        let stream = self.link.establish_retrying(self.retry_delay, None)?;
        self.sessions += 1;
        let session = self.sessions;
        info!(session, "Session started");

        match self.responder.serve(stream) {
            Ok(end) => {
                info!(session, ?end, "Session ended");
                Ok(end)
            }
            Err(e) => {
                error!(session, "Session failed: {e}");
                self.responder.reset_devices();
                Err(e)
            }
        }
    }

    /// Serve sessions until the process is stopped.
    pub fn run(&mut self) -> Result<()> {
        self.bind()?;
        info!("Responder ready ({})", self.link.endpoint());
        loop {
            if let Err(e) = self.serve_one() {
                error!("Resuming after error: {e}");
            }
        }
    }
}
