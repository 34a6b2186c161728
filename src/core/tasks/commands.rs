//! Command task: answers requests from the command channel.

use tokio::sync::mpsc;

use crate::core::dispatch::{CommandDispatcher, CommandRequest};
use crate::core::shutdown::ShutdownSignal;

pub async fn command_task(
    dispatcher: CommandDispatcher,
    mut requests: mpsc::Receiver<CommandRequest>,
    mut shutdown: ShutdownSignal,
) {
    log::info!("Command task started");

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else { break };
                let response = dispatcher.handle(&request.method, request.payload);
                if request.reply.send(response).is_err() {
                    log::debug!("Caller went away before the {} response", request.method);
                }
            }
            _ = shutdown.wait() => break,
        }
    }

    log::info!("Command task stopped");
}
