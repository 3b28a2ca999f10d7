// ABOUTME: Workspace descriptor collaborator: where a codebox lives and change notifications
// ABOUTME: Includes an in-memory SharedWorkspace for applications without their own model

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Key holding the codebox base address.
pub const BASE_ADDRESS_KEY: &str = "codebox.url";
/// Optional key overriding auto-subscription ("true" / "false").
pub const LISTEN_EVENTS_KEY: &str = "codebox.listenEvents";

pub type ChangeCallback = Box<dyn Fn(WorkspaceDescriptor) + Send + Sync>;

/// Source of workspace descriptors.
pub trait Workspace: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Mount path of the workspace, e.g. "/ws1".
    fn path(&self) -> String;

    /// Called with the new descriptor every time the workspace is replaced.
    fn on_change(&self, callback: ChangeCallback);
}

/// Snapshot of what a connection needs from a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceDescriptor {
    pub base_address: Option<String>,
    pub path: String,
    /// Overrides the client's auto-subscribe default when set.
    pub listen_events: Option<bool>,
}

impl WorkspaceDescriptor {
    pub fn new(base_address: impl Into<String>) -> Self {
        Self {
            base_address: Some(base_address.into()),
            ..Self::default()
        }
    }

    /// Descriptor of a workspace not attached to any codebox.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_listen_events(mut self, listen: bool) -> Self {
        self.listen_events = Some(listen);
        self
    }

    pub fn from_workspace(workspace: &dyn Workspace) -> Self {
        Self {
            base_address: workspace.get(BASE_ADDRESS_KEY),
            path: workspace.path(),
            listen_events: workspace
                .get(LISTEN_EVENTS_KEY)
                .and_then(|v| v.parse::<bool>().ok()),
        }
    }

    /// Mount path without its leading separator.
    pub fn virtual_path(&self) -> &str {
        self.path.strip_prefix('/').unwrap_or(&self.path)
    }
}

struct WorkspaceState {
    values: HashMap<String, String>,
    path: String,
}

/// In-memory workspace. Every mutation fires the change callbacks.
pub struct SharedWorkspace {
    state: RwLock<WorkspaceState>,
    callbacks: Mutex<Vec<Arc<dyn Fn(WorkspaceDescriptor) + Send + Sync>>>,
}

impl SharedWorkspace {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(WorkspaceState {
                values: HashMap::new(),
                path: path.into(),
            }),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Builder-style initial value; does not notify.
    pub fn with(self, key: &str, value: impl Into<String>) -> Self {
        self.write_state().values.insert(key.to_string(), value.into());
        self
    }

    /// Replace (or with `None`, remove) a value and notify.
    pub fn set(&self, key: &str, value: Option<String>) {
        {
            let mut state = self.write_state();
            match value {
                Some(value) => state.values.insert(key.to_string(), value),
                None => state.values.remove(key),
            };
        }
        self.notify();
    }

    pub fn set_path(&self, path: impl Into<String>) {
        self.write_state().path = path.into();
        self.notify();
    }

    pub fn descriptor(&self) -> WorkspaceDescriptor {
        WorkspaceDescriptor::from_workspace(self)
    }

    fn notify(&self) {
        let descriptor = self.descriptor();
        let callbacks: Vec<_> = self
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        tracing::debug!(base_address = ?descriptor.base_address, "workspace changed");
        for callback in callbacks {
            callback(descriptor.clone());
        }
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, WorkspaceState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Workspace for SharedWorkspace {
    fn get(&self, key: &str) -> Option<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.values.get(key).cloned()
    }

    fn path(&self) -> String {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.path.clone()
    }

    fn on_change(&self, callback: ChangeCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::from(callback));
    }
}
