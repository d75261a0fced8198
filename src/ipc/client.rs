//! Client-side connection to the session host
//!
//! Used by the CLI and by the mock backend. A connection is bound to one
//! user and one project by its opening `hello` frame.

use std::time::Duration;

use tokio::io::{BufReader, ReadHalf, WriteHalf};

use crate::common::{Error, Result};

use super::protocol::{ChannelEvent, ProjectId, Role, UserId};
use super::transport::{self, Stream};

/// Connection to the running host
pub struct HostClient {
    reader: BufReader<ReadHalf<Stream>>,
    writer: WriteHalf<Stream>,
}

impl HostClient {
    /// Connect and announce who we are
    pub async fn connect(user_id: &str, project_id: &str, role: Role) -> Result<Self> {
        let stream = transport::connect().await.map_err(|e| {
            if transport::is_not_running(&e) {
                Error::DaemonNotRunning
            } else {
                Error::DaemonConnectionFailed(e)
            }
        })?;

        let (reader, writer) = tokio::io::split(stream);
        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
        };

        client
            .send(&ChannelEvent::Hello {
                user_id: UserId::from(user_id),
                project_id: ProjectId::from(project_id),
                role,
            })
            .await?;

        Ok(client)
    }

    /// Send one event
    pub async fn send(&mut self, event: &ChannelEvent) -> Result<()> {
        tracing::trace!(event = event.name(), "Sending");
        transport::send_event(&mut self.writer, event)
            .await
            .map_err(|e| Error::DaemonCommunication(e.to_string()))
    }

    /// Wait for the next event
    pub async fn recv(&mut self) -> Result<ChannelEvent> {
        match transport::recv_event(&mut self.reader).await {
            Ok(event) => Ok(event),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(Error::DaemonCommunication("Host closed the connection".to_string()))
            }
            Err(e) => Err(Error::DaemonCommunication(e.to_string())),
        }
    }

    /// Wait for the first event accepted by `pick`, discarding others
    pub async fn recv_until<T>(
        &mut self,
        timeout: Duration,
        mut pick: impl FnMut(ChannelEvent) -> Option<T>,
    ) -> Result<T> {
        let wait = async {
            loop {
                let event = self.recv().await?;
                let name = event.name();
                match pick(event) {
                    Some(found) => return Ok::<T, Error>(found),
                    None => tracing::trace!(event = name, "Skipping"),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::RequestTimeout(timeout.as_secs()))?
    }
}
