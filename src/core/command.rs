use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;

/// External command to control a running workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Abort {
        reason: Option<String>,
    },
    /// Stop scheduling and persist a pause once in-flight nodes settle.
    Pause,
    /// Keys are `"node_id.variable"` selectors.
    UpdateVariables {
        variables: HashMap<String, Value>,
    },
}

pub type CommandSender = mpsc::Sender<Command>;
pub type CommandReceiver = mpsc::Receiver<Command>;

pub fn create_command_channel() -> (CommandSender, CommandReceiver) {
    mpsc::channel(64)
}
