//! Client task
//!
//! One tokio task owns the [`MessageClient`] and serialises everything that
//! touches it: application commands, transport and storage events, and the
//! heartbeat deadline. After every input the deferred work is drained and
//! the client's outbox is forwarded to the application.

use mcs_core::{
    ClientStats, McsError, MessageClient, Result, SystemTimeSource, TimeSource,
};
use tracing::{debug, error, info, trace};

use crate::channel::{
    AppEvent, AppEventSender, Command, CommandReceiver, Effect, Event, EventReceiver,
};
use crate::connection::ChannelConnection;
use crate::storage::ChannelStore;

/// Client wired to the runtime's channels
pub type RuntimeClient<T = SystemTimeSource> = MessageClient<ChannelConnection, ChannelStore, T>;

// ----------------------------------------------------------------------------
// Client Task
// ----------------------------------------------------------------------------

pub struct ClientTask<T = SystemTimeSource> {
    client: RuntimeClient<T>,
    command_receiver: CommandReceiver,
    event_receiver: EventReceiver,
    app_event_sender: AppEventSender,
    /// App events produced by the task itself, ahead of the client's outbox
    outbox: Vec<AppEvent>,
    running: bool,
}

impl<T: TimeSource> ClientTask<T> {
    pub fn new(
        client: RuntimeClient<T>,
        command_receiver: CommandReceiver,
        event_receiver: EventReceiver,
        app_event_sender: AppEventSender,
    ) -> Self {
        Self {
            client,
            command_receiver,
            event_receiver,
            app_event_sender,
            outbox: Vec::new(),
            running: true,
        }
    }

    /// Run until shutdown; returns the final statistics
    pub async fn run(mut self) -> Result<ClientStats> {
        info!("Client task starting");

        while self.running {
            let heartbeat_delay = self
                .client
                .next_heartbeat_deadline()
                .map(|deadline| deadline.duration_since(self.client.time_source().now()));

            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.process_command(command),
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }

                event = self.event_receiver.recv() => {
                    match event {
                        Some(event) => self.process_event(event),
                        None => {
                            info!("Event channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = tokio::time::sleep(heartbeat_delay.unwrap_or_default()), if heartbeat_delay.is_some() => {
                    if let Some(action) = self.client.on_heartbeat_timer() {
                        debug!("Heartbeat deadline reached: {:?}", action);
                    }
                }
            }

            self.client.run_pending_tasks();
            if let Err(e) = self.forward_events().await {
                error!("Unrecoverable error, shutting down client task: {}", e);
                return Err(e);
            }
        }

        info!("Client task stopped");
        Ok(self.client.stats().clone())
    }

    fn process_command(&mut self, command: Command) {
        trace!("Processing command {:?}", command);
        match command {
            Command::Login {
                credentials,
                user_serial_numbers,
            } => {
                if let Err(e) = self.client.login(credentials, user_serial_numbers) {
                    self.report_error(e);
                }
            }
            Command::SendMessage(packet) => {
                let status = self.client.send_message(packet);
                trace!("Message admission: {}", status);
            }
            Command::GetStats => {
                self.outbox.push(AppEvent::Stats(self.client.stats().clone()));
            }
            Command::Destroy => self.client.destroy(),
            Command::Shutdown => self.running = false,
        }
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::ConnectionOpening => match self.client.on_connection_opening() {
                Ok(login) => self
                    .client
                    .connection_mut()
                    .publish(Effect::SendLogin(login)),
                Err(e) => self.report_error(e),
            },
            Event::PacketReceived(packet) => self.client.on_packet_received(packet),
            Event::ReachabilityChanged { reachable } => {
                debug!("Endpoint reachable: {}", reachable);
                self.client.connection_mut().set_reachable(reachable);
                self.client.on_reachability_changed();
            }
            Event::StoreUpdateFinished { success } => self.client.on_store_update_finished(success),
        }
    }

    fn report_error(&mut self, err: McsError) {
        error!("Client operation failed: {}", err);
        self.outbox.push(AppEvent::Error {
            message: err.to_string(),
        });
    }

    async fn forward_events(&mut self) -> Result<()> {
        let client_events = self.client.drain_events();
        self.outbox.extend(client_events.into_iter().map(AppEvent::from));

        for app_event in self.outbox.drain(..) {
            self.app_event_sender
                .send(app_event)
                .await
                .map_err(|_| McsError::channel_error("App event channel closed"))?;
        }
        Ok(())
    }
}
