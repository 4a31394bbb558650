//! Connector Core: declares sink connectors on a connect worker and
//! supervises them through the lifecycle state machine.

mod control;
mod descriptor;
mod state;
mod supervisor;

pub use control::{
    ConnectControl, ConnectorStatus, KafkaConnectClient, TaskStatus, WorkerState, STATE_FAILED,
    STATE_RUNNING,
};
pub use descriptor::{config_diff, table_of, ConnectorDescriptor, SinkTarget, WriteMode};
pub use state::{apply_event, ConnectorEvent, ConnectorState, TransitionError};
pub use supervisor::{ConnectorSettings, SinkConnector};
