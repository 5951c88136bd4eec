use super::{ComponentState, SnapboothApp};
use tracing::debug;

/// Components in start order; shutdown walks this list backwards
pub(super) const COMPONENTS: [&str; 5] = ["storage", "gallery", "session", "server", "keyboard"];

impl SnapboothApp {
    pub(super) async fn set_component_state(&self, component: &str, state: ComponentState) {
        let mut states = self.component_states.lock().await;
        debug!("Component '{}' state changed to: {:?}", component, state);
        states.insert(component.to_string(), state);
    }

    pub async fn component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().await.get(component).cloned()
    }

    /// Registered components and their states, in start order
    pub async fn component_states(&self) -> Vec<(&'static str, ComponentState)> {
        let states = self.component_states.lock().await;
        COMPONENTS
            .iter()
            .filter_map(|name| states.get(*name).map(|state| (*name, state.clone())))
            .collect()
    }

    /// True once every registered component reports `Running`
    pub async fn is_running(&self) -> bool {
        let states = self.component_states.lock().await;
        !states.is_empty() && states.values().all(|s| *s == ComponentState::Running)
    }
}
