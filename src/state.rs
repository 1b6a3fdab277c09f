use rand::{distributions::Alphanumeric, Rng};

use crate::{
    command::Command,
    config::{Config, Parameter},
    loader::{load_snapshot, snapshot_location, LoadOutcome},
    resp_value::RespValue,
    store::Store,
};

const REPLICATION_ID_LEN: usize = 40;

/// Everything a connection needs. Store and config carry their own locks, so
/// the state is shared as a plain `Arc<State>`.
pub struct State {
    store: Store,
    config: Config,
    role_state: RoleState,
}

enum RoleState {
    Replica { master: String },
    Master(MasterState),
}

struct MasterState {
    replication_id: String,
    replication_offset: usize,
}

impl Default for MasterState {
    fn default() -> Self {
        MasterState {
            replication_id: rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(REPLICATION_ID_LEN)
                .map(char::from)
                .collect(),
            replication_offset: 0,
        }
    }
}

impl State {
    /// Builds the state around an empty store. Call `restore` before serving.
    pub fn new(config: Config) -> Self {
        let role_state = match config.parameter(Parameter::ReplicaOf) {
            Some(master) => RoleState::Replica { master },
            None => RoleState::Master(MasterState::default()),
        };

        State {
            store: Store::new(),
            config,
            role_state,
        }
    }

    /// Loads the configured snapshot into the store.
    pub fn restore(&self) -> LoadOutcome {
        let (dir, file_name) = snapshot_location(&self.config);
        load_snapshot(dir, &file_name, &self.store)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn replication_info(&self) -> Vec<(&'static str, String)> {
        match &self.role_state {
            RoleState::Master(master_state) => vec![
                ("role", self.role_state.to_string()),
                ("master_replid", master_state.replication_id.clone()),
                (
                    "master_repl_offset",
                    master_state.replication_offset.to_string(),
                ),
            ],
            RoleState::Replica { master } => vec![
                ("role", self.role_state.to_string()),
                ("master", master.clone()),
            ],
        }
    }

    pub fn handle_request(&self, request: RespValue) -> RespValue {
        match Command::parse(request) {
            Ok(command) => {
                tracing::debug!("Handling {:?}", command);
                command.execute(&self.store, &self.config, &self.replication_info())
            }
            Err(e) => RespValue::SimpleError(e.to_string()),
        }
    }
}

impl std::fmt::Display for RoleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleState::Master(_) => write!(f, "master"),
            RoleState::Replica { .. } => write!(f, "slave"),
        }
    }
}
